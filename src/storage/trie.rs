use tracing::trace;

use crate::error::{ArrayError, Result};
use crate::storage::file::TrieFile;
use crate::storage::node::{child_slot, NODE_SIZE, ROOT_OFFSET};

/// Walks the trie from the root along the given bits. Returns `None` as soon
/// as a child pointer is absent.
pub(crate) fn find<I>(file: &mut TrieFile, bits: I) -> Result<Option<u32>>
where
    I: Iterator<Item = bool>,
{
    let mut current = ROOT_OFFSET;
    for bit in bits {
        match read_child(file, current, bit)? {
            Some(child) => current = child,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Walks the trie from the root along the given bits, appending fresh empty
/// nodes wherever a child pointer is absent.
pub(crate) fn ensure<I>(file: &mut TrieFile, bits: I) -> Result<u32>
where
    I: Iterator<Item = bool>,
{
    let mut current = ROOT_OFFSET;
    for bit in bits {
        current = match read_child(file, current, bit)? {
            Some(child) => child,
            None => allocate_node(file, child_slot(current, bit))?,
        };
    }
    Ok(current)
}

/// Reads and bounds-checks one child pointer. Zero means no child.
pub(crate) fn read_child(file: &mut TrieFile, node: u32, bit: bool) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    file.read_at(child_slot(node, bit), &mut buf)?;
    let child = u32::from_le_bytes(buf);
    if child == 0 {
        return Ok(None);
    }
    if child < ROOT_OFFSET || child.saturating_add(NODE_SIZE) > file.end() {
        return Err(ArrayError::Corruption(format!(
            "child pointer {child} out of bounds"
        )));
    }
    Ok(Some(child))
}

/// Appends an all-zero node and stores its offset into the parent slot. The
/// slot is written only after the node bytes land, so a failure leaves the
/// trie reachable; the file is truncated back to the pre-allocation
/// watermark before the error surfaces.
fn allocate_node(file: &mut TrieFile, slot: u32) -> Result<u32> {
    let watermark = file.end();
    let offset = file.append(&[0u8; NODE_SIZE as usize])?;
    if let Err(err) = file.write_at(slot, &offset.to_le_bytes()) {
        let _ = file.truncate_to(watermark);
        return Err(err);
    }
    trace!(offset, slot, "trie.node.alloc");
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyBits;
    use crate::storage::header::HEADER_SIZE;
    use tempfile::tempfile;

    fn trie_with_root() -> TrieFile {
        let mut file = TrieFile::new(tempfile().expect("temp file"), 0, false);
        file.append(&[0u8; (HEADER_SIZE + NODE_SIZE) as usize])
            .expect("init root");
        file
    }

    #[test]
    fn empty_bit_stream_addresses_the_root() {
        let mut file = trie_with_root();
        assert_eq!(find(&mut file, KeyBits::new(b"")).expect("find"), Some(12));
        assert_eq!(ensure(&mut file, KeyBits::new(b"")).expect("ensure"), 12);
        assert_eq!(file.end(), 25);
    }

    #[test]
    fn ensure_allocates_one_node_per_bit() {
        let mut file = trie_with_root();
        let offset = ensure(&mut file, KeyBits::new(b"a")).expect("ensure");
        assert_eq!(file.end(), 25 + 8 * NODE_SIZE);
        assert_eq!(offset, file.end() - NODE_SIZE);
    }

    #[test]
    fn find_returns_none_before_ensure_and_the_same_offset_after() {
        let mut file = trie_with_root();
        assert_eq!(find(&mut file, KeyBits::new(b"a")).expect("find"), None);
        let created = ensure(&mut file, KeyBits::new(b"a")).expect("ensure");
        assert_eq!(
            find(&mut file, KeyBits::new(b"a")).expect("find"),
            Some(created)
        );
    }

    #[test]
    fn shared_prefixes_share_nodes() {
        let mut file = trie_with_root();
        ensure(&mut file, KeyBits::new(b"a")).expect("ensure a");
        let end_after_a = file.end();
        // 'b' = 0x62 shares the first six bits with 'a' = 0x61.
        ensure(&mut file, KeyBits::new(b"b")).expect("ensure b");
        assert_eq!(file.end(), end_after_a + 2 * NODE_SIZE);
    }
}
