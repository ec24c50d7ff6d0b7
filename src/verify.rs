use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::array::HugeArray;
use crate::error::Result;
use crate::storage::block::BLOCK_HEADER_SIZE;
use crate::storage::header::{Header, HEADER_SIZE};
use crate::storage::node::{ValueTag, ROOT_OFFSET};

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Structural validation of the header, trie, and value blocks.
    Fast,
    /// Structural validation plus decoding of every serialized payload.
    Full,
}

/// Indicates the severity of a verification finding.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    Warning,
    Error,
}

/// A single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    pub severity: VerifySeverity,
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }
}

/// Statistics collected while walking the reachable trie.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ArrayStats {
    /// Trie nodes reachable from the root.
    pub nodes_reached: u64,
    /// Nodes whose tag is not unset.
    pub values_set: u64,
    /// Value blocks referenced by reachable nodes.
    pub value_blocks: u64,
    /// Blocks retained by unset or singleton-tagged nodes for later reuse.
    pub latent_blocks: u64,
    /// Sum of the used payload bytes across referenced blocks.
    pub payload_bytes: u64,
}

/// Complete report of a verification pass.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    pub level: VerifyLevel,
    pub success: bool,
    pub findings: Vec<VerifyFinding>,
    pub stats: ArrayStats,
}

impl VerifyReport {
    fn record(&mut self, finding: VerifyFinding) {
        warn!(message = %finding.message, "verify.finding");
        self.success = false;
        if self.findings.len() < MAX_FINDINGS {
            self.findings.push(finding);
        }
    }
}

impl HugeArray {
    /// Walks the reachable trie and checks the on-disk invariants: header
    /// magic and version, node bounds and tags, value-block bounds and
    /// capacities, and the item counter. `Full` additionally decodes every
    /// serialized payload with the configured codec.
    pub fn verify(&mut self, level: VerifyLevel) -> Result<VerifyReport> {
        let mut report = VerifyReport {
            level,
            success: true,
            findings: Vec::new(),
            stats: ArrayStats::default(),
        };

        let mut header_buf = [0u8; HEADER_SIZE as usize];
        self.raw_read(0, &mut header_buf)?;
        let header_count = match Header::decode(&header_buf) {
            Ok(header) => Some(header.count),
            Err(err) => {
                report.record(VerifyFinding::error(format!("bad header: {err}")));
                None
            }
        };

        let end = self.file_size();
        let mut visited = HashSet::new();
        let mut pending = vec![ROOT_OFFSET];
        while let Some(offset) = pending.pop() {
            if !visited.insert(offset) {
                report.record(VerifyFinding::error(format!(
                    "node at {offset} is reachable through more than one path"
                )));
                continue;
            }
            report.stats.nodes_reached += 1;
            let node = match self.read_node(offset) {
                Ok(node) => node,
                Err(err) => {
                    report.record(VerifyFinding::error(format!(
                        "node at {offset} unreadable: {err}"
                    )));
                    continue;
                }
            };
            if node.tag.is_set() {
                report.stats.values_set += 1;
            }
            if node.tag == ValueTag::Serialized && node.value_ptr == 0 {
                report.record(VerifyFinding::error(format!(
                    "serialized node at {offset} has no value block"
                )));
            }
            if node.value_ptr != 0 {
                self.check_block(offset, &node, level, end, &mut report)?;
            }
            for bit in [false, true] {
                let child = node.child(bit);
                if child != 0 {
                    pending.push(child);
                }
            }
        }

        if let Some(count) = header_count {
            if u64::from(count) != report.stats.values_set {
                report.record(VerifyFinding::error(format!(
                    "header counts {count} items but {} reachable nodes are set",
                    report.stats.values_set
                )));
            }
            if count != self.count() {
                report.record(VerifyFinding::error(format!(
                    "header counts {count} items but the open handle tracks {}",
                    self.count()
                )));
            }
        }

        Ok(report)
    }

    /// Convenience wrapper: the stats of a [`VerifyLevel::Fast`] pass.
    pub fn stats(&mut self) -> Result<ArrayStats> {
        Ok(self.verify(VerifyLevel::Fast)?.stats)
    }

    fn check_block(
        &mut self,
        node_offset: u32,
        node: &crate::storage::node::Node,
        level: VerifyLevel,
        end: u32,
        report: &mut VerifyReport,
    ) -> Result<()> {
        let ptr = node.value_ptr;
        if u64::from(ptr) + u64::from(BLOCK_HEADER_SIZE) > u64::from(end) {
            report.record(VerifyFinding::error(format!(
                "value pointer {ptr} at node {node_offset} is out of bounds"
            )));
            return Ok(());
        }
        let mut head = [0u8; BLOCK_HEADER_SIZE as usize];
        self.raw_read(ptr, &mut head)?;
        let capacity = u32::from_le_bytes(head[..4].try_into().expect("slice is 4 bytes"));
        let used = u32::from_le_bytes(head[4..8].try_into().expect("slice is 4 bytes"));
        if used > capacity {
            report.record(VerifyFinding::error(format!(
                "value block at {ptr} uses {used} bytes of a {capacity}-byte capacity"
            )));
            return Ok(());
        }
        if u64::from(ptr) + u64::from(BLOCK_HEADER_SIZE) + u64::from(capacity) > u64::from(end) {
            report.record(VerifyFinding::error(format!(
                "value block at {ptr} extends past the end of the file"
            )));
            return Ok(());
        }
        report.stats.value_blocks += 1;
        report.stats.payload_bytes += u64::from(used);
        if node.tag != ValueTag::Serialized {
            report.stats.latent_blocks += 1;
        } else if matches!(level, VerifyLevel::Full) {
            let node_copy = *node;
            if let Err(err) = self.decode_node_value(node_copy) {
                report.record(VerifyFinding::error(format!(
                    "payload at {ptr} does not decode: {err}"
                )));
            }
        }
        Ok(())
    }
}
