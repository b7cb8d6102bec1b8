//! Converts `pulldown-cmark` events into [`AstNode`] blocks.
//!
//! # Event flow
//!
//! `pulldown-cmark` reports structure as balanced `Start(tag)` / `End(tag)`
//! pairs with leaf events (`Text`, `Code`, `InlineMath`...) in between:
//!
//! ```markdown
//! > Hello *world*
//! ```
//!
//! 1. `Start(BlockQuote)`
//! 2. `Start(Paragraph)`
//! 3. `Text("Hello ")`
//! 4. `Start(Emphasis)`
//! 5. `Text("world")`
//! 6. `End(Emphasis)`
//! 7. `End(Paragraph)`
//! 8. `End(BlockQuote)`
//!
//! [`TreeBuilder`] keeps one frame per open tag. An `End` pops the frame,
//! builds its node and hands it to the parent frame, or emits it as a
//! top-level block when the stack is empty. `Rule` is the only block that
//! arrives as a single event.

use std::ops::Range;
use std::sync::Arc;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};

use crate::ast::{Alignment, AstNode, NodeBody, NodeKind, NodeRef, NodeType, Shape};

/// How a block proves it is finished without a following blank line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Only a blank line (or the end of input) finishes it.
    None,
    FencedCode,
    AtxHeading,
    ThematicBreak,
    Container,
}

/// A top-level block and the bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct ParsedBlock {
    pub range: Range<usize>,
    pub node: NodeRef,
    pub delimiter: Delimiter,
}

/// Grammar extensions enabled for every parse.
pub fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_MATH
        | Options::ENABLE_GFM
}

/// Parses `text` into top-level blocks with byte ranges relative to `text`.
pub fn parse_blocks(text: &str) -> Vec<ParsedBlock> {
    let mut builder = TreeBuilder::new(text);
    for (event, range) in Parser::new_ext(text, options()).into_offset_iter() {
        builder.process_event(event, range);
    }
    builder.finish()
}

#[derive(Debug)]
enum FrameKind {
    Node(NodeKind),
    /// Tags without a node of their own; children move up to the parent.
    Transparent,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    children: Vec<NodeRef>,
    /// Raw content for leaf-shaped tags (code, HTML blocks) and image alt text.
    text: String,
    range: Range<usize>,
    fenced: bool,
}

impl Frame {
    fn collects_text(&self) -> bool {
        matches!(
            &self.kind,
            FrameKind::Node(kind) if kind.shape() != Shape::Branch
        )
    }
}

struct TreeBuilder<'a> {
    source: &'a str,
    stack: Vec<Frame>,
    blocks: Vec<ParsedBlock>,
}

impl<'a> TreeBuilder<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            stack: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn process_event(&mut self, event: Event<'_>, range: Range<usize>) {
        match event {
            Event::Start(tag) => self.open(tag, range),
            Event::End(_) => self.close(),
            Event::Text(text) => self.push_text(&text),
            Event::Code(code) => self.push_node(AstNode::leaf(NodeKind::InlineCode, code.as_ref())),
            Event::InlineMath(math) => {
                self.push_node(AstNode::leaf(NodeKind::InlineMath, math.as_ref()))
            }
            Event::DisplayMath(math) => {
                self.push_node(AstNode::leaf(NodeKind::Math, math.as_ref()))
            }
            Event::Html(html) => {
                if self.top_collects_text() {
                    self.push_text(&html);
                } else {
                    self.push_node(AstNode::leaf(NodeKind::InlineHtml, html.as_ref()));
                }
            }
            Event::InlineHtml(html) => {
                self.push_node(AstNode::leaf(NodeKind::InlineHtml, html.as_ref()))
            }
            Event::FootnoteReference(label) => self.push_node(AstNode::void(
                NodeKind::FootnoteReference {
                    label: label.to_string(),
                },
            )),
            Event::SoftBreak => self.push_text("\n"),
            Event::HardBreak => self.push_node(AstNode::void(NodeKind::Break)),
            Event::Rule => {
                let node = AstNode::void(NodeKind::ThematicBreak);
                if self.stack.is_empty() {
                    self.blocks.push(ParsedBlock {
                        range,
                        node,
                        delimiter: Delimiter::ThematicBreak,
                    });
                } else {
                    self.push_node(node);
                }
            }
            Event::TaskListMarker(checked) => self.mark_task(checked),
        }
    }

    fn open(&mut self, tag: Tag<'_>, range: Range<usize>) {
        let mut fenced = false;
        let kind = match tag {
            Tag::Paragraph => FrameKind::Node(NodeKind::Paragraph),
            Tag::Heading { level, .. } => FrameKind::Node(NodeKind::Heading {
                depth: level as u8,
            }),
            Tag::BlockQuote(_) => FrameKind::Node(NodeKind::Blockquote),
            Tag::CodeBlock(kind) => {
                let (lang, meta) = match kind {
                    CodeBlockKind::Fenced(info) => {
                        fenced = true;
                        split_info(&info)
                    }
                    CodeBlockKind::Indented => (None, None),
                };
                FrameKind::Node(NodeKind::Code { lang, meta })
            }
            Tag::HtmlBlock => FrameKind::Node(NodeKind::Html),
            Tag::List(first) => FrameKind::Node(NodeKind::List {
                ordered: first.is_some(),
                start: first,
                spread: false,
            }),
            Tag::Item => FrameKind::Node(NodeKind::ListItem { checked: None }),
            Tag::FootnoteDefinition(label) => FrameKind::Node(NodeKind::FootnoteDefinition {
                label: label.to_string(),
            }),
            Tag::Table(aligns) => FrameKind::Node(NodeKind::Table {
                align: aligns.into_iter().map(convert_alignment).collect(),
            }),
            Tag::TableHead => FrameKind::Node(NodeKind::TableRow { header: true }),
            Tag::TableRow => FrameKind::Node(NodeKind::TableRow { header: false }),
            Tag::TableCell => FrameKind::Node(NodeKind::TableCell),
            Tag::Emphasis => FrameKind::Node(NodeKind::Emphasis),
            Tag::Strong => FrameKind::Node(NodeKind::Strong),
            Tag::Strikethrough => FrameKind::Node(NodeKind::Delete),
            Tag::Link {
                dest_url, title, ..
            } => FrameKind::Node(NodeKind::Link {
                url: dest_url.to_string(),
                title: non_empty(&title),
            }),
            Tag::Image {
                dest_url, title, ..
            } => FrameKind::Node(NodeKind::Image {
                url: dest_url.to_string(),
                title: non_empty(&title),
                alt: String::new(),
            }),
            _ => FrameKind::Transparent,
        };
        self.stack.push(Frame {
            kind,
            children: Vec::new(),
            text: String::new(),
            range,
            fenced,
        });
    }

    fn close(&mut self) {
        let Some(frame) = self.stack.pop() else {
            log::warn!("unbalanced end event from markdown grammar");
            return;
        };
        let range = frame.range.clone();
        let delimiter = self.delimiter_for(&frame);

        let nodes = match frame.kind {
            FrameKind::Transparent => frame.children,
            FrameKind::Node(kind) => vec![build_node(kind, frame.children, frame.text)],
        };

        if self.stack.is_empty() {
            for node in nodes {
                self.blocks.push(ParsedBlock {
                    range: range.clone(),
                    node,
                    delimiter,
                });
            }
        } else {
            for node in nodes {
                self.push_node(node);
            }
        }
    }

    fn delimiter_for(&self, frame: &Frame) -> Delimiter {
        match &frame.kind {
            FrameKind::Node(NodeKind::Code { .. }) if frame.fenced => Delimiter::FencedCode,
            FrameKind::Node(NodeKind::Heading { .. })
                if self.source[frame.range.clone()]
                    .trim_start()
                    .starts_with('#') =>
            {
                Delimiter::AtxHeading
            }
            _ => Delimiter::None,
        }
    }

    fn top_collects_text(&self) -> bool {
        self.stack.last().is_some_and(Frame::collects_text)
    }

    fn push_text(&mut self, text: &str) {
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        if top.collects_text() {
            top.text.push_str(text);
            return;
        }
        // pulldown-cmark splits text runs at special characters; join them back.
        if let Some(last) = top.children.last_mut()
            && last.node_type() == NodeType::Text
            && let Some(node) = Arc::get_mut(last)
            && let NodeBody::Leaf(leaf) = &mut node.body
        {
            leaf.value.push_str(text);
            return;
        }
        top.children.push(AstNode::text(text));
    }

    fn push_node(&mut self, node: NodeRef) {
        match self.stack.last_mut() {
            Some(top) if top.collects_text() => top.text.push_str(&node.plain_text()),
            Some(top) => top.children.push(node),
            None => log::warn!("{:?} outside of any block dropped", node.node_type()),
        }
    }

    fn mark_task(&mut self, checked: bool) {
        if let Some(frame) = self
            .stack
            .iter_mut()
            .rev()
            .find(|f| matches!(f.kind, FrameKind::Node(NodeKind::ListItem { .. })))
        {
            frame.kind = FrameKind::Node(NodeKind::ListItem {
                checked: Some(checked),
            });
        }
    }

    fn finish(mut self) -> Vec<ParsedBlock> {
        while !self.stack.is_empty() {
            self.close();
        }
        self.blocks
    }
}

fn build_node(kind: NodeKind, children: Vec<NodeRef>, text: String) -> NodeRef {
    match kind {
        NodeKind::Code { .. } | NodeKind::Html => {
            let value = text.strip_suffix('\n').unwrap_or(&text).to_string();
            AstNode::leaf(kind, value)
        }
        NodeKind::Image { url, title, .. } => AstNode::void(NodeKind::Image {
            url,
            title,
            alt: text,
        }),
        NodeKind::Paragraph
            if children.len() == 1 && children[0].node_type() == NodeType::Math =>
        {
            // `$$...$$` standing alone is a math block, not a paragraph.
            Arc::clone(&children[0])
        }
        NodeKind::List { ordered, start, .. } => {
            let spread = children.iter().any(|item| {
                item.children()
                    .iter()
                    .any(|c| c.node_type() == NodeType::Paragraph)
            });
            AstNode::branch(
                NodeKind::List {
                    ordered,
                    start,
                    spread,
                },
                children,
            )
        }
        kind if kind.shape() == Shape::Leaf => AstNode::leaf(kind, text),
        kind if kind.shape() == Shape::Void => AstNode::void(kind),
        kind => AstNode::branch(kind, children),
    }
}

fn split_info(info: &str) -> (Option<String>, Option<String>) {
    let info = info.trim();
    match info.split_once(char::is_whitespace) {
        Some((lang, meta)) => (non_empty(lang), non_empty(meta.trim())),
        None => (non_empty(info), None),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn convert_alignment(align: pulldown_cmark::Alignment) -> Alignment {
    match align {
        pulldown_cmark::Alignment::None => Alignment::None,
        pulldown_cmark::Alignment::Left => Alignment::Left,
        pulldown_cmark::Alignment::Center => Alignment::Center,
        pulldown_cmark::Alignment::Right => Alignment::Right,
    }
}
