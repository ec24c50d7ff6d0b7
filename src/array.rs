use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::cursor::CursorState;
use crate::error::{ArrayError, Result};
use crate::key::{canonical_bytes, KeyBits};
use crate::model::{Key, Value};
use crate::storage::block;
use crate::storage::file::TrieFile;
use crate::storage::header::{Header, COUNT_OFFSET, HEADER_SIZE};
use crate::storage::node::{singleton_value, Node, ValueTag, NODE_SIZE, VALUE_PTR_OFFSET};
use crate::storage::ser::{BinaryCodec, ValueCodec};
use crate::storage::trie;

/// The outcome an [`HugeArray::update`] callback asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Leave the entry as it is.
    Keep,
    /// Store a new value under the key.
    Set(Value),
    /// Remove the entry. The node keeps its value block so a later write can
    /// reuse the capacity in place.
    Unset,
}

/// A persistent associative array stored as a binary bit-trie in a single
/// random-access file.
///
/// Keys are canonicalized to byte strings and walked bit by bit from the
/// root node; values are either encoded by the node tag alone (the six
/// singleton forms) or serialized into append-only value blocks. One writer
/// per file; concurrent opens are undefined.
pub struct HugeArray {
    file: TrieFile,
    path: Option<PathBuf>,
    count: u32,
    codec: Box<dyn ValueCodec>,
    cursor: CursorState,
}

impl std::fmt::Debug for HugeArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HugeArray")
            .field("path", &self.path)
            .field("count", &self.count)
            .field("file_end", &self.file.end())
            .finish()
    }
}

impl HugeArray {
    /// Opens (or creates and initializes) the array backed by `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::open_with_codec(path, config, Box::new(BinaryCodec))
    }

    /// Opens the array with a caller-supplied codec. Reading an existing file
    /// requires the codec that wrote it.
    pub fn open_with_codec(
        path: impl AsRef<Path>,
        config: Config,
        codec: Box<dyn ValueCodec>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(ArrayError::CannotOpenFile)?;
        Self::from_file(file, Some(path), config, codec)
    }

    /// Opens an array backed by a private temporary file.
    pub fn temp() -> Result<Self> {
        Self::temp_with_config(Config::default())
    }

    pub fn temp_with_config(config: Config) -> Result<Self> {
        let file = tempfile::tempfile().map_err(ArrayError::CannotOpenFile)?;
        Self::from_file(file, None, config, Box::new(BinaryCodec))
    }

    fn from_file(
        file: File,
        path: Option<PathBuf>,
        config: Config,
        codec: Box<dyn ValueCodec>,
    ) -> Result<Self> {
        let len = file.metadata().map_err(ArrayError::CannotOpenFile)?.len();
        if len > u64::from(u32::MAX) {
            return Err(ArrayError::Corruption(
                "file exceeds the 4 GiB offset space".into(),
            ));
        }
        let len = len as u32;
        let mut array = Self {
            file: TrieFile::new(file, len, config.sync_writes),
            path,
            count: 0,
            codec,
            cursor: CursorState::new(),
        };
        if len == 0 {
            array.clear()?;
        } else {
            if len < HEADER_SIZE {
                return Err(ArrayError::Truncated);
            }
            let mut buf = [0u8; HEADER_SIZE as usize];
            array.file.read_at(0, &mut buf)?;
            let header = Header::decode(&buf)?;
            if len < HEADER_SIZE + NODE_SIZE {
                return Err(ArrayError::Truncated);
            }
            array.count = header.count;
        }
        debug!(count = array.count, end = array.file.end(), "array.open");
        Ok(array)
    }

    /// Number of keys currently set (the mirror of header bytes 8..11).
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Current file length; every allocation appends here.
    pub fn file_size(&self) -> u32 {
        self.file.end()
    }

    /// Returns the value stored under `key`, or `None` when the key is
    /// absent. Absence additionally emits a `warn` event so callers that
    /// treat a missing key as noteworthy can surface it through their
    /// tracing subscriber; use [`try_get`](Self::try_get) for silent reads.
    pub fn get(&mut self, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        match self.read_value(&key)? {
            Some(value) => Ok(Some(value)),
            None => {
                warn!(key = ?key, "array.get.missing");
                Ok(None)
            }
        }
    }

    /// Like [`get`](Self::get) but silent on absence, returning `default`
    /// instead.
    pub fn try_get(&mut self, key: impl Into<Key>, default: Value) -> Result<Value> {
        Ok(self.read_value(&key.into())?.unwrap_or(default))
    }

    /// True when a value (including `Null`) is stored under `key`.
    pub fn exists(&mut self, key: impl Into<Key>) -> Result<bool> {
        match self.locate(&key.into())? {
            Some(offset) => Ok(self.read_node(offset)?.tag.is_set()),
            None => Ok(false),
        }
    }

    /// Like [`exists`](Self::exists) but treats a stored `Null` as absent,
    /// mirroring the SQL "is null" convention.
    pub fn offset_exists(&mut self, key: impl Into<Key>) -> Result<bool> {
        match self.locate(&key.into())? {
            Some(offset) => {
                let tag = self.read_node(offset)?.tag;
                Ok(tag.is_set() && tag != ValueTag::Null)
            }
            None => Ok(false),
        }
    }

    /// Stores `value` under `key`, creating trie nodes along the path as
    /// needed.
    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        let bytes = canonical_bytes(&key)?;
        let offset = trie::ensure(&mut self.file, KeyBits::new(&bytes))?;
        self.write_value(offset, &value)
    }

    /// Removes the value under `key`. A second `unset` of the same key is a
    /// no-op, as is unsetting a key that was never written.
    pub fn unset(&mut self, key: impl Into<Key>) -> Result<()> {
        let Some(offset) = self.locate(&key.into())? else {
            return Ok(());
        };
        let node = self.read_node(offset)?;
        if !node.tag.is_set() {
            return Ok(());
        }
        self.commit_node(offset, node, ValueTag::Unset, node.value_ptr)?;
        self.file.sync()?;
        trace!(offset, "array.unset");
        Ok(())
    }

    /// Reads the entry under `key`, hands it to `f`, and applies the
    /// returned [`Mutation`]. With `create = false` an unreachable key is
    /// left untouched and `f` is not invoked. A callback error surfaces as
    /// [`ArrayError::BadUpdateResponse`].
    pub fn update<F>(&mut self, key: impl Into<Key>, create: bool, f: F) -> Result<()>
    where
        F: FnOnce(Option<&Value>) -> std::result::Result<Mutation, String>,
    {
        let key = key.into();
        let bytes = canonical_bytes(&key)?;
        let offset = if create {
            trie::ensure(&mut self.file, KeyBits::new(&bytes))?
        } else {
            match trie::find(&mut self.file, KeyBits::new(&bytes))? {
                Some(offset) => offset,
                None => return Ok(()),
            }
        };
        let node = self.read_node(offset)?;
        let current = self.decode_node_value(node)?;
        match f(current.as_ref()).map_err(ArrayError::BadUpdateResponse)? {
            Mutation::Keep => Ok(()),
            Mutation::Set(value) => self.write_value(offset, &value),
            Mutation::Unset => {
                if node.tag.is_set() {
                    self.commit_node(offset, node, ValueTag::Unset, node.value_ptr)?;
                    self.file.sync()?;
                }
                Ok(())
            }
        }
    }

    /// Truncates the file and reinitializes the header and the empty root
    /// node. The implicit cursor is reset to the new root.
    pub fn clear(&mut self) -> Result<()> {
        self.file.truncate_to(0)?;
        let mut image = [0u8; (HEADER_SIZE + NODE_SIZE) as usize];
        image[..HEADER_SIZE as usize].copy_from_slice(&Header { count: 0 }.encode());
        self.file.append(&image)?;
        self.count = 0;
        self.cursor.reset();
        self.file.sync()?;
        debug!("array.clear");
        Ok(())
    }

    /// Forces file data to disk regardless of the configured sync policy.
    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all()
    }

    /// Flushes and releases the handle. Files opened from a caller-supplied
    /// path are left world-accessible, matching the historical on-disk
    /// contract.
    pub fn close(mut self) -> Result<()> {
        self.file.sync_all()?;
        #[cfg(unix)]
        if let Some(path) = &self.path {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))?;
        }
        Ok(())
    }

    /// Moves the implicit cursor back to the root node. Always succeeds.
    pub fn seek_reset(&mut self) {
        self.cursor.reset();
    }

    /// Follows the chosen child pointer from the cursor's node. Returns
    /// `false`, leaving the cursor in place, when no child exists there.
    pub fn seek_to_next(&mut self, bit: bool) -> Result<bool> {
        match trie::read_child(&mut self.file, self.cursor.node, bit)? {
            Some(child) => {
                self.cursor.descend(child);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pops one level off the cursor's ancestor stack. Returns `false` when
    /// the cursor is already at the root of its walk.
    pub fn seek_back(&mut self) -> bool {
        self.cursor.ascend()
    }

    /// Value tag and value-block pointer of the node under the cursor.
    pub fn current_value_info(&mut self) -> Result<(ValueTag, u32)> {
        let node = self.read_node(self.cursor.node)?;
        Ok((node.tag, node.value_ptr))
    }

    /// Decoded value of the node under the cursor, `None` when unset.
    pub fn current_value(&mut self) -> Result<Option<Value>> {
        let node = self.read_node(self.cursor.node)?;
        self.decode_node_value(node)
    }

    fn locate(&mut self, key: &Key) -> Result<Option<u32>> {
        let bytes = canonical_bytes(key)?;
        trie::find(&mut self.file, KeyBits::new(&bytes))
    }

    pub(crate) fn raw_read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        self.file.read_at(offset, buf)
    }

    pub(crate) fn read_node(&mut self, offset: u32) -> Result<Node> {
        let mut buf = [0u8; NODE_SIZE as usize];
        self.file.read_at(offset, &mut buf)?;
        Node::decode(&buf)
    }

    fn read_value(&mut self, key: &Key) -> Result<Option<Value>> {
        let Some(offset) = self.locate(key)? else {
            return Ok(None);
        };
        let node = self.read_node(offset)?;
        self.decode_node_value(node)
    }

    pub(crate) fn decode_node_value(&mut self, node: Node) -> Result<Option<Value>> {
        match node.tag {
            ValueTag::Unset => Ok(None),
            ValueTag::Serialized => {
                if node.value_ptr == 0 {
                    return Err(ArrayError::Corruption(
                        "serialized node without a value block".into(),
                    ));
                }
                let payload = block::read_payload(&mut self.file, node.value_ptr)?;
                Ok(Some(self.codec.decode(&payload)?))
            }
            tag => Ok(singleton_value(tag)),
        }
    }

    /// The write-typed-value protocol: tag discrimination, the
    /// same-singleton short-circuit, in-place block reuse or a fresh append,
    /// a minimal node rewrite, and the counter update, in that order.
    fn write_value(&mut self, offset: u32, value: &Value) -> Result<()> {
        let node = self.read_node(offset)?;
        let new_tag = ValueTag::of(value);
        let mut new_ptr = node.value_ptr;

        // Same singleton tag: the tag already encodes the value.
        if node.tag == new_tag && new_tag != ValueTag::Serialized {
            return Ok(());
        }

        if new_tag == ValueTag::Serialized {
            let payload = self.codec.encode(value)?;
            let fits = node.value_ptr != 0
                && block::capacity(&mut self.file, node.value_ptr)? as usize >= payload.len();
            if fits {
                block::overwrite(&mut self.file, node.value_ptr, &payload)?;
            } else {
                new_ptr = block::append(&mut self.file, &payload)?;
            }
        }

        self.commit_node(offset, node, new_tag, new_ptr)?;
        self.file.sync()?;
        trace!(offset, tag = ?new_tag, "array.set");
        Ok(())
    }

    /// Rewrites only the node bytes that changed, then keeps the persistent
    /// item counter in step with the tag transition.
    fn commit_node(&mut self, offset: u32, old: Node, new_tag: ValueTag, new_ptr: u32) -> Result<()> {
        let tag_changed = old.tag != new_tag;
        let ptr_changed = old.value_ptr != new_ptr;
        if tag_changed && ptr_changed {
            let mut buf = [0u8; 5];
            buf[0] = new_tag.to_byte();
            buf[1..5].copy_from_slice(&new_ptr.to_le_bytes());
            self.file.write_at(offset, &buf)?;
        } else if tag_changed {
            self.file.write_at(offset, &[new_tag.to_byte()])?;
        } else if ptr_changed {
            self.file
                .write_at(offset + VALUE_PTR_OFFSET, &new_ptr.to_le_bytes())?;
        }

        if !old.tag.is_set() && new_tag.is_set() {
            self.store_count(self.count.checked_add(1).ok_or_else(|| {
                ArrayError::Corruption("item counter overflow".into())
            })?)
        } else if old.tag.is_set() && !new_tag.is_set() {
            self.store_count(self.count.checked_sub(1).ok_or_else(|| {
                ArrayError::Corruption("item counter underflow".into())
            })?)
        } else {
            Ok(())
        }
    }

    fn store_count(&mut self, count: u32) -> Result<()> {
        self.file.write_at(COUNT_OFFSET, &count.to_le_bytes())?;
        self.count = count;
        Ok(())
    }
}

impl Drop for HugeArray {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
    }
}
