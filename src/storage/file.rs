use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{ArrayError, Result};

/// Backing file plus the in-memory end-of-allocations watermark.
///
/// All offsets are 32-bit; the watermark always equals the file length at
/// quiescent points. Appends that fail part-way truncate the file back to
/// the watermark before surfacing the error.
pub(crate) struct TrieFile {
    file: File,
    end: u32,
    sync_writes: bool,
}

impl TrieFile {
    pub fn new(file: File, end: u32, sync_writes: bool) -> Self {
        Self {
            file,
            end,
            sync_writes,
        }
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset.into()))?;
        self.file.read_exact(buf).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                ArrayError::Corruption(format!("read past end of file at offset {offset}"))
            } else {
                ArrayError::Io(err)
            }
        })
    }

    pub fn write_at(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset.into()))
            .map_err(ArrayError::WriteFailure)?;
        self.file.write_all(bytes).map_err(ArrayError::WriteFailure)
    }

    /// Appends at the watermark and returns the offset written. On failure
    /// the file is truncated back so the length invariant holds.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u32> {
        let offset = self.end;
        let new_end = u64::from(offset) + bytes.len() as u64;
        if new_end > u64::from(u32::MAX) {
            return Err(ArrayError::Full);
        }
        if let Err(err) = self.write_at(offset, bytes) {
            let _ = self.truncate_to(offset);
            return Err(err);
        }
        self.end = new_end as u32;
        Ok(offset)
    }

    pub fn truncate_to(&mut self, end: u32) -> Result<()> {
        self.file
            .set_len(end.into())
            .map_err(ArrayError::WriteFailure)?;
        self.end = end;
        Ok(())
    }

    /// Sync honoring the configured policy.
    pub fn sync(&mut self) -> Result<()> {
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Unconditional sync, used by explicit flush and close.
    pub fn sync_all(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}
