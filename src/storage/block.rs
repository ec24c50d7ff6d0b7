use tracing::trace;

use crate::error::{ArrayError, Result};
use crate::storage::file::TrieFile;

/// Capacity word plus used-length word.
pub(crate) const BLOCK_HEADER_SIZE: u32 = 8;

/// Appends a fresh value block sized exactly to the payload and returns its
/// offset. A short write truncates back to the prior watermark inside
/// [`TrieFile::append`].
pub(crate) fn append(file: &mut TrieFile, payload: &[u8]) -> Result<u32> {
    let len = u32::try_from(payload.len())
        .map_err(|_| ArrayError::Serialization("payload length exceeds u32::MAX".into()))?;
    let mut record = Vec::with_capacity(payload.len() + BLOCK_HEADER_SIZE as usize);
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(payload);
    let offset = file.append(&record)?;
    trace!(offset, len, "block.append");
    Ok(offset)
}

/// Rewrites the used-length word and payload of an existing block in place.
/// The caller has already checked that the payload fits the block capacity;
/// the capacity word is left untouched.
pub(crate) fn overwrite(file: &mut TrieFile, ptr: u32, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    let mut record = Vec::with_capacity(payload.len() + 4);
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(payload);
    file.write_at(ptr + 4, &record)?;
    trace!(ptr, len, "block.reuse");
    Ok(())
}

pub(crate) fn capacity(file: &mut TrieFile, ptr: u32) -> Result<u32> {
    let mut buf = [0u8; 4];
    file.read_at(ptr, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_payload(file: &mut TrieFile, ptr: u32) -> Result<Vec<u8>> {
    let mut head = [0u8; BLOCK_HEADER_SIZE as usize];
    file.read_at(ptr, &mut head)?;
    let capacity = u32::from_le_bytes(head[..4].try_into().expect("slice is 4 bytes"));
    let used = u32::from_le_bytes(head[4..8].try_into().expect("slice is 4 bytes"));
    if used > capacity {
        return Err(ArrayError::Corruption(format!(
            "value block at {ptr} uses {used} bytes of a {capacity}-byte capacity"
        )));
    }
    let mut payload = vec![0u8; used as usize];
    file.read_at(ptr + BLOCK_HEADER_SIZE, &mut payload)?;
    Ok(payload)
}
