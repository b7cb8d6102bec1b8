//! # Markdown AST
//!
//! Block and inline nodes produced by the incremental parser and consumed by the
//! display transformer. Nodes are immutable once built and shared through
//! [`NodeRef`] (`Arc<AstNode>`), so a truncated copy can reuse any subtree of the
//! source node it was cut from.
//!
//! A node is split into two parts:
//!
//! - **`kind`**: which Markdown construct this is, with its attributes
//!   (heading depth, code language, link target...)
//! - **`body`**: what it holds, either a string `value` ([`NodeBody::Leaf`]),
//!   ordered children ([`NodeBody::Branch`]) or nothing ([`NodeBody::Void`])
//!
//! Each kind expects exactly one body [`Shape`]; [`AstNode::is_well_formed`]
//! checks the pairing.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Shared handle to an immutable node.
pub type NodeRef = Arc<AstNode>;

/// Fieldless tag for every node kind. Plugins are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Paragraph,
    Heading,
    Blockquote,
    List,
    ListItem,
    Code,
    Math,
    Html,
    ThematicBreak,
    Table,
    TableRow,
    TableCell,
    ContainerDirective,
    FootnoteDefinition,
    Text,
    Emphasis,
    Strong,
    Delete,
    InlineCode,
    InlineMath,
    InlineHtml,
    Link,
    Image,
    Break,
    FootnoteReference,
}

/// The body layout a kind expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Leaf,
    Branch,
    Void,
}

/// Column alignment of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Alignment {
    None,
    Left,
    Center,
    Right,
}

/// Markdown construct together with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    Paragraph,
    Heading {
        depth: u8,
    },
    Blockquote,
    List {
        ordered: bool,
        start: Option<u64>,
        /// Loose list: items are separated by blank lines.
        spread: bool,
    },
    ListItem {
        /// `Some` for task list items.
        checked: Option<bool>,
    },
    Code {
        lang: Option<String>,
        meta: Option<String>,
    },
    Math,
    Html,
    ThematicBreak,
    Table {
        align: Vec<Alignment>,
    },
    TableRow {
        header: bool,
    },
    TableCell,
    ContainerDirective {
        name: String,
        label: Option<String>,
    },
    FootnoteDefinition {
        label: String,
    },
    Text,
    Emphasis,
    Strong,
    Delete,
    InlineCode,
    InlineMath,
    InlineHtml,
    Link {
        url: String,
        title: Option<String>,
    },
    Image {
        url: String,
        title: Option<String>,
        alt: String,
    },
    Break,
    FootnoteReference {
        label: String,
    },
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Paragraph => NodeType::Paragraph,
            NodeKind::Heading { .. } => NodeType::Heading,
            NodeKind::Blockquote => NodeType::Blockquote,
            NodeKind::List { .. } => NodeType::List,
            NodeKind::ListItem { .. } => NodeType::ListItem,
            NodeKind::Code { .. } => NodeType::Code,
            NodeKind::Math => NodeType::Math,
            NodeKind::Html => NodeType::Html,
            NodeKind::ThematicBreak => NodeType::ThematicBreak,
            NodeKind::Table { .. } => NodeType::Table,
            NodeKind::TableRow { .. } => NodeType::TableRow,
            NodeKind::TableCell => NodeType::TableCell,
            NodeKind::ContainerDirective { .. } => NodeType::ContainerDirective,
            NodeKind::FootnoteDefinition { .. } => NodeType::FootnoteDefinition,
            NodeKind::Text => NodeType::Text,
            NodeKind::Emphasis => NodeType::Emphasis,
            NodeKind::Strong => NodeType::Strong,
            NodeKind::Delete => NodeType::Delete,
            NodeKind::InlineCode => NodeType::InlineCode,
            NodeKind::InlineMath => NodeType::InlineMath,
            NodeKind::InlineHtml => NodeType::InlineHtml,
            NodeKind::Link { .. } => NodeType::Link,
            NodeKind::Image { .. } => NodeType::Image,
            NodeKind::Break => NodeType::Break,
            NodeKind::FootnoteReference { .. } => NodeType::FootnoteReference,
        }
    }

    /// Body layout this kind must carry.
    pub fn shape(&self) -> Shape {
        match self {
            NodeKind::Code { .. }
            | NodeKind::Math
            | NodeKind::Html
            | NodeKind::Text
            | NodeKind::InlineCode
            | NodeKind::InlineMath
            | NodeKind::InlineHtml => Shape::Leaf,
            NodeKind::ThematicBreak
            | NodeKind::Image { .. }
            | NodeKind::Break
            | NodeKind::FootnoteReference { .. } => Shape::Void,
            NodeKind::Paragraph
            | NodeKind::Heading { .. }
            | NodeKind::Blockquote
            | NodeKind::List { .. }
            | NodeKind::ListItem { .. }
            | NodeKind::Table { .. }
            | NodeKind::TableRow { .. }
            | NodeKind::TableCell
            | NodeKind::ContainerDirective { .. }
            | NodeKind::FootnoteDefinition { .. }
            | NodeKind::Emphasis
            | NodeKind::Strong
            | NodeKind::Delete
            | NodeKind::Link { .. } => Shape::Branch,
        }
    }
}

/// A slice of a text leaf that appeared in one reveal step.
///
/// Attached to the still-animating tail of a text leaf so a renderer can fade
/// in each increment on its own clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    pub text: String,
    #[serde(skip)]
    pub created_at: Instant,
}

/// String payload of a leaf node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaf {
    pub value: String,
    /// Characters of `value` before the first animating chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_length: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<TextChunk>,
}

impl Leaf {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            stable_length: None,
            chunks: Vec::new(),
        }
    }

    pub fn is_annotated(&self) -> bool {
        self.stable_length.is_some() || !self.chunks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeBody {
    Leaf(Leaf),
    Branch(Vec<NodeRef>),
    Void,
}

impl NodeBody {
    fn is_void(&self) -> bool {
        matches!(self, NodeBody::Void)
    }

    fn shape(&self) -> Shape {
        match self {
            NodeBody::Leaf(_) => Shape::Leaf,
            NodeBody::Branch(_) => Shape::Branch,
            NodeBody::Void => Shape::Void,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AstNode {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "NodeBody::is_void")]
    pub body: NodeBody,
}

impl AstNode {
    pub fn leaf(kind: NodeKind, value: impl Into<String>) -> NodeRef {
        Arc::new(Self {
            kind,
            body: NodeBody::Leaf(Leaf::new(value)),
        })
    }

    pub fn branch(kind: NodeKind, children: Vec<NodeRef>) -> NodeRef {
        Arc::new(Self {
            kind,
            body: NodeBody::Branch(children),
        })
    }

    pub fn void(kind: NodeKind) -> NodeRef {
        Arc::new(Self {
            kind,
            body: NodeBody::Void,
        })
    }

    pub fn text(value: impl Into<String>) -> NodeRef {
        Self::leaf(NodeKind::Text, value)
    }

    pub fn paragraph(children: Vec<NodeRef>) -> NodeRef {
        Self::branch(NodeKind::Paragraph, children)
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Children of a branch; empty for leaves and voids.
    pub fn children(&self) -> &[NodeRef] {
        match &self.body {
            NodeBody::Branch(children) => children,
            _ => &[],
        }
    }

    pub fn value(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Leaf(leaf) => Some(&leaf.value),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match &self.body {
            NodeBody::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Copy of this node with the same kind and different children.
    pub fn with_children(&self, children: Vec<NodeRef>) -> NodeRef {
        Arc::new(Self {
            kind: self.kind.clone(),
            body: NodeBody::Branch(children),
        })
    }

    /// Whether the body matches what the kind expects.
    pub fn is_well_formed(&self) -> bool {
        self.kind.shape() == self.body.shape()
    }

    /// Concatenated leaf values in document order. Voids contribute nothing.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match &self.body {
            NodeBody::Leaf(leaf) => out.push_str(&leaf.value),
            NodeBody::Branch(children) => {
                for child in children {
                    child.collect_text(out);
                }
            }
            NodeBody::Void => {}
        }
    }
}
