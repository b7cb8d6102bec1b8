use std::fmt;

use serde::Serialize;

use crate::ast::NodeRef;

/// Identity of a top-level block.
///
/// The parser derives it from the byte offset of the block start, so the same
/// logical block keeps its id while the buffer grows behind it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_offset(offset: usize) -> Self {
        Self(offset.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for BlockId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    /// Further input could still change this block.
    Pending,
    /// No further input can change this block.
    Completed,
}

/// A top-level block as classified by the parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceBlock {
    pub id: BlockId,
    pub node: NodeRef,
    pub status: BlockStatus,
}

impl SourceBlock {
    pub fn new(id: impl Into<BlockId>, node: NodeRef, status: BlockStatus) -> Self {
        Self {
            id: id.into(),
            node,
            status,
        }
    }

    pub fn pending(id: impl Into<BlockId>, node: NodeRef) -> Self {
        Self::new(id, node, BlockStatus::Pending)
    }

    pub fn completed(id: impl Into<BlockId>, node: NodeRef) -> Self {
        Self::new(id, node, BlockStatus::Completed)
    }

    pub fn is_completed(&self) -> bool {
        self.status == BlockStatus::Completed
    }
}

/// A block as currently shown: its node truncated to what has been revealed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayBlock {
    pub id: BlockId,
    pub display_node: Option<NodeRef>,
    /// Fully revealed and completed in the source.
    pub is_display_complete: bool,
}
