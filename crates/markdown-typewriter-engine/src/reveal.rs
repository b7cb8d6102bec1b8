//! # Measurement and Slicing
//!
//! Pure functions over a single [`AstNode`]:
//!
//! - **`count_chars`**: how many reveal units a node holds (leaf characters,
//!   one unit per void node, plugin overrides first)
//! - **`slice_ast`**: a copy holding only the first `n` units, same tree shape,
//!   branches emptied by the cut dropped
//! - **`append_to_ast`**: extends an earlier slice to a longer one, reusing the
//!   earlier slice's subtrees so unchanged parts keep their identity
//!
//! Units are Unicode scalar values. Any subtree that falls entirely inside the
//! revealed prefix is returned as the source `Arc` itself, so a fully revealed
//! node costs no allocation.
//!
//! ## Smart merge
//!
//! Extending a slice only ever changes its right edge. [`merge_slices`] walks
//! the base slice and a fresh slice together along the last child at each
//! level: earlier children come from the base, the last child is merged
//! recursively, and newly reached children are appended from the fresh slice.
//! Text leaves always come from the fresh slice because chunk metadata lives
//! there. Work per tick is proportional to the depth of the change.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ast::{AstNode, Leaf, NodeBody, NodeRef, NodeType, TextChunk};
use crate::plugins::PluginRegistry;

/// Reveal units `[start, end)` that appeared together at `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    pub created_at: Instant,
}

/// Reveal history of one block, used to annotate text leaves for fade-in.
///
/// Spans are contiguous: the first starts at `stable_chars` and each one
/// starts where the previous ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkLedger {
    stable_chars: usize,
    chunks: Vec<ChunkSpan>,
}

impl ChunkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units before the oldest recorded chunk; nothing there animates.
    pub fn stable_chars(&self) -> usize {
        self.stable_chars
    }

    pub fn chunks(&self) -> &[ChunkSpan] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn frontier(&self) -> usize {
        self.chunks.last().map_or(self.stable_chars, |c| c.end)
    }

    /// Records that units `[start, end)` were revealed at `at`.
    pub fn record(&mut self, start: usize, end: usize, at: Instant) {
        let frontier = self.frontier();
        let start = if self.chunks.is_empty() {
            self.stable_chars = start;
            start
        } else if start > frontier {
            // A gap breaks contiguity; everything so far counts as settled.
            self.chunks.clear();
            self.stable_chars = start;
            start
        } else {
            start.max(frontier)
        };
        if end <= start {
            return;
        }
        self.chunks.push(ChunkSpan {
            start,
            end,
            created_at: at,
        });
    }

    /// Folds chunks older than `max_age` into the stable prefix.
    pub fn expire(&mut self, now: Instant, max_age: Duration) {
        let keep_from = self
            .chunks
            .iter()
            .position(|c| now.saturating_duration_since(c.created_at) < max_age)
            .unwrap_or(self.chunks.len());
        if keep_from > 0 {
            self.stable_chars = self.chunks[keep_from - 1].end;
            self.chunks.drain(..keep_from);
        }
    }

    pub fn clear(&mut self) {
        self.stable_chars = 0;
        self.chunks.clear();
    }

    /// Chunk metadata for a text leaf covering units `[start, start + take)`.
    fn annotate(&self, value: &str, start: usize, take: usize) -> Option<(usize, Vec<TextChunk>)> {
        let end = start + take;
        let first = self.chunks.first()?;
        if end <= first.start || start >= self.frontier() {
            return None;
        }
        let stable_length = first.start.saturating_sub(start).min(take);
        let chunks = self
            .chunks
            .iter()
            .filter(|c| c.start < end && c.end > start)
            .map(|c| {
                let from = c.start.max(start) - start;
                let to = c.end.min(end) - start;
                TextChunk {
                    text: char_range(value, from, to).to_string(),
                    created_at: c.created_at,
                }
            })
            .collect();
        Some((stable_length, chunks))
    }
}

/// How far [`merge_slices`] may trust the base slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Base was cut from the same source node; its earlier children are current.
    Trusting,
    /// Source node was replaced since the base was cut; earlier children are
    /// reused only when equal to the fresh ones.
    Verified,
}

struct Budget {
    pos: usize,
    max: usize,
    /// Leaves ending at or before this carry no chunk metadata.
    skip: usize,
}

/// Measures and truncates nodes under a plugin registry.
#[derive(Clone, Copy)]
pub struct Slicer<'a> {
    plugins: &'a PluginRegistry,
    chunks: Option<&'a ChunkLedger>,
}

impl<'a> Slicer<'a> {
    pub fn new(plugins: &'a PluginRegistry) -> Self {
        Self {
            plugins,
            chunks: None,
        }
    }

    pub fn with_chunks(mut self, chunks: Option<&'a ChunkLedger>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn count(&self, node: &AstNode) -> usize {
        if let Some(plugin) = self.plugins.find(node)
            && let Some(count) = plugin.count_chars(node)
        {
            return count;
        }
        match &node.body {
            NodeBody::Leaf(leaf) => leaf.value.chars().count(),
            NodeBody::Branch(children) => children.iter().map(|c| self.count(c)).sum(),
            NodeBody::Void => 1,
        }
    }

    /// First `max_chars` units of `node`, or `None` when nothing is revealed.
    ///
    /// `skip_chars` marks a prefix already known to be settled; it only saves
    /// annotation work and never changes the result.
    pub fn slice(&self, node: &NodeRef, max_chars: usize, skip_chars: usize) -> Option<NodeRef> {
        if max_chars == 0 {
            return None;
        }
        let skip = match self.chunks {
            Some(ledger) => skip_chars.min(ledger.stable_chars()),
            None => skip_chars,
        };
        let mut budget = Budget {
            pos: 0,
            max: max_chars,
            skip,
        };
        self.slice_node(node, &mut budget)
    }

    /// Extends `base` (a slice of `source` up to `start_chars`) to `end_chars`.
    pub fn append(
        &self,
        base: Option<&NodeRef>,
        source: &NodeRef,
        start_chars: usize,
        end_chars: usize,
        mode: MergeMode,
    ) -> Option<NodeRef> {
        let full = self.slice(source, end_chars, start_chars)?;
        Some(match base {
            Some(base) => merge_slices(base, &full, mode),
            None => full,
        })
    }

    fn slice_node(&self, node: &NodeRef, budget: &mut Budget) -> Option<NodeRef> {
        let remaining = budget.max.saturating_sub(budget.pos);
        if remaining == 0 {
            return None;
        }

        if let Some(plugin) = self.plugins.find(node) {
            let total = self.count(node);
            if let Some(cut) = plugin.slice(node, remaining, total) {
                budget.pos += cut.consumed.min(remaining);
                return cut.node;
            }
        }

        if !node.is_well_formed() {
            log::warn!(
                "{:?} node carries a mismatched body; revealing it unsliced",
                node.node_type()
            );
            budget.pos += self.count(node);
            return Some(Arc::clone(node));
        }

        match &node.body {
            NodeBody::Void => {
                budget.pos += 1;
                Some(Arc::clone(node))
            }
            NodeBody::Leaf(leaf) => self.slice_leaf(node, leaf, budget),
            NodeBody::Branch(children) => self.slice_branch(node, children, budget),
        }
    }

    fn slice_leaf(&self, node: &NodeRef, leaf: &Leaf, budget: &mut Budget) -> Option<NodeRef> {
        let start = budget.pos;
        let len = leaf.value.chars().count();
        let take = len.min(budget.max - start);
        budget.pos += take;

        let annotation = if node.node_type() == NodeType::Text && start + take > budget.skip {
            self.chunks
                .and_then(|ledger| ledger.annotate(&leaf.value, start, take))
        } else {
            None
        };

        if take == len && annotation.is_none() {
            return Some(Arc::clone(node));
        }

        let (stable_length, chunks) = match annotation {
            Some((stable, chunks)) => (Some(stable), chunks),
            None => (None, Vec::new()),
        };
        Some(Arc::new(AstNode {
            kind: node.kind.clone(),
            body: NodeBody::Leaf(Leaf {
                value: prefix_chars(&leaf.value, take).to_string(),
                stable_length,
                chunks,
            }),
        }))
    }

    fn slice_branch(
        &self,
        node: &NodeRef,
        children: &[NodeRef],
        budget: &mut Budget,
    ) -> Option<NodeRef> {
        if children.is_empty() {
            return Some(Arc::clone(node));
        }

        let mut out = Vec::with_capacity(children.len());
        for child in children {
            if budget.pos >= budget.max {
                break;
            }
            if let Some(sliced) = self.slice_node(child, budget) {
                out.push(sliced);
            }
        }
        if out.is_empty() {
            return None;
        }

        let untouched = out.len() == children.len()
            && out.iter().zip(children).all(|(a, b)| Arc::ptr_eq(a, b));
        if untouched {
            Some(Arc::clone(node))
        } else {
            Some(node.with_children(out))
        }
    }
}

/// Combines an earlier slice with a longer fresh slice of the same source.
pub fn merge_slices(base: &NodeRef, full: &NodeRef, mode: MergeMode) -> NodeRef {
    if Arc::ptr_eq(base, full) || base.node_type() != full.node_type() {
        return Arc::clone(full);
    }

    let (base_children, full_children) = match (&base.body, &full.body) {
        (NodeBody::Branch(b), NodeBody::Branch(f)) => (b, f),
        _ => return Arc::clone(full),
    };
    if base_children.is_empty() || full_children.len() < base_children.len() {
        return Arc::clone(full);
    }

    let last = base_children.len() - 1;
    let mut children = Vec::with_capacity(full_children.len());
    for (b, f) in base_children[..last].iter().zip(&full_children[..last]) {
        let reuse = match mode {
            MergeMode::Trusting => true,
            MergeMode::Verified => Arc::ptr_eq(b, f) || b == f,
        };
        children.push(Arc::clone(if reuse { b } else { f }));
    }
    children.push(merge_slices(
        &base_children[last],
        &full_children[last],
        mode,
    ));
    children.extend(full_children[base_children.len()..].iter().cloned());

    let same_children = children.len() == base_children.len()
        && children
            .iter()
            .zip(base_children)
            .all(|(a, b)| Arc::ptr_eq(a, b));
    if same_children && base.kind == full.kind {
        return Arc::clone(base);
    }
    Arc::new(AstNode {
        kind: full.kind.clone(),
        body: NodeBody::Branch(children),
    })
}

pub fn count_chars(node: &AstNode, plugins: &PluginRegistry) -> usize {
    Slicer::new(plugins).count(node)
}

pub fn slice_ast(
    node: &NodeRef,
    max_chars: usize,
    plugins: &PluginRegistry,
    chunks: Option<&ChunkLedger>,
    skip_chars: usize,
) -> Option<NodeRef> {
    Slicer::new(plugins)
        .with_chunks(chunks)
        .slice(node, max_chars, skip_chars)
}

pub fn append_to_ast(
    base: Option<&NodeRef>,
    source: &NodeRef,
    start_chars: usize,
    end_chars: usize,
    plugins: &PluginRegistry,
    chunks: Option<&ChunkLedger>,
) -> Option<NodeRef> {
    Slicer::new(plugins).with_chunks(chunks).append(
        base,
        source,
        start_chars,
        end_chars,
        MergeMode::Trusting,
    )
}

fn byte_index(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

fn prefix_chars(s: &str, chars: usize) -> &str {
    &s[..byte_index(s, chars)]
}

fn char_range(s: &str, from: usize, to: usize) -> &str {
    &s[byte_index(s, from)..byte_index(s, to)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn strong(text: &str) -> NodeRef {
        AstNode::branch(NodeKind::Strong, vec![AstNode::text(text)])
    }

    /// "Hello " + **world** + " " + $E=mc^2$ + "!"
    fn mixed_paragraph() -> NodeRef {
        AstNode::paragraph(vec![
            AstNode::text("Hello "),
            strong("world"),
            AstNode::text(" "),
            AstNode::leaf(NodeKind::InlineMath, "E=mc^2"),
            AstNode::text("!"),
        ])
    }

    #[test]
    fn counts_leaf_characters_and_void_units() {
        let node = AstNode::paragraph(vec![
            AstNode::text("héllo"),
            AstNode::void(NodeKind::Break),
            AstNode::void(NodeKind::Image {
                url: "a.png".into(),
                title: None,
                alt: "alt".into(),
            }),
        ]);
        assert_eq!(count_chars(&node, &PluginRegistry::empty()), 7);
    }

    #[test]
    fn math_plugin_counts_formula_as_one_unit() {
        let node = mixed_paragraph();
        assert_eq!(count_chars(&node, &PluginRegistry::builtin()), 14);
        assert_eq!(count_chars(&node, &PluginRegistry::empty()), 19);
    }

    #[test]
    fn zero_budget_yields_nothing() {
        let node = mixed_paragraph();
        assert!(slice_ast(&node, 0, &PluginRegistry::builtin(), None, 0).is_none());
    }

    #[test]
    fn truncates_inside_nested_branch() {
        let node = mixed_paragraph();
        let sliced = slice_ast(&node, 8, &PluginRegistry::builtin(), None, 0).unwrap();

        assert_eq!(sliced.plain_text(), "Hello wo");
        assert_eq!(sliced.children().len(), 2);
        assert_eq!(sliced.children()[1].node_type(), NodeType::Strong);
        assert!(Arc::ptr_eq(&sliced.children()[0], &node.children()[0]));
    }

    #[test]
    fn full_budget_returns_source_itself() {
        let node = mixed_paragraph();
        let sliced = slice_ast(&node, 100, &PluginRegistry::builtin(), None, 0).unwrap();
        assert!(Arc::ptr_eq(&sliced, &node));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let node = AstNode::paragraph(vec![AstNode::text("日本語のテキスト")]);
        let sliced = slice_ast(&node, 3, &PluginRegistry::empty(), None, 0).unwrap();
        assert_eq!(sliced.plain_text(), "日本語");
    }

    #[test]
    fn math_is_never_partially_revealed() {
        let node = mixed_paragraph();
        let plugins = PluginRegistry::builtin();
        let total = count_chars(&node, &plugins);

        for max in 1..=total {
            let sliced = slice_ast(&node, max, &plugins, None, 0).unwrap();
            for child in sliced.children() {
                if child.node_type() == NodeType::InlineMath {
                    assert_eq!(child.value(), Some("E=mc^2"), "max = {max}");
                }
            }
        }
    }

    #[test]
    fn without_plugins_math_degrades_to_character_truncation() {
        let node = mixed_paragraph();
        let sliced = slice_ast(&node, 15, &PluginRegistry::empty(), None, 0).unwrap();
        let math = sliced
            .children()
            .iter()
            .find(|c| c.node_type() == NodeType::InlineMath)
            .unwrap();
        assert_eq!(math.value(), Some("E=m"));
    }

    #[test]
    fn thematic_break_consumes_one_slot() {
        let node = AstNode::branch(
            NodeKind::Blockquote,
            vec![
                AstNode::void(NodeKind::ThematicBreak),
                AstNode::paragraph(vec![AstNode::text("after")]),
            ],
        );
        let sliced = slice_ast(&node, 2, &PluginRegistry::builtin(), None, 0).unwrap();
        assert_eq!(sliced.children().len(), 2);
        assert_eq!(sliced.plain_text(), "a");
    }

    #[test]
    fn malformed_node_is_revealed_unsliced() {
        let broken = Arc::new(AstNode {
            kind: NodeKind::Text,
            body: NodeBody::Branch(vec![AstNode::text("inner text")]),
        });
        let node = AstNode::paragraph(vec![AstNode::text("ab"), broken.clone()]);
        let sliced = slice_ast(&node, 4, &PluginRegistry::empty(), None, 0).unwrap();
        assert!(Arc::ptr_eq(&sliced.children()[1], &broken));
    }

    #[rstest]
    #[case(3)]
    #[case(7)]
    #[case(11)]
    #[case(14)]
    fn skip_chars_never_changes_the_result(#[case] max: usize) {
        let node = mixed_paragraph();
        let plugins = PluginRegistry::builtin();
        let now = Instant::now();
        let mut ledger = ChunkLedger::new();
        ledger.record(2, 5, now);
        ledger.record(5, max.max(6), now);

        let reference = slice_ast(&node, max, &plugins, Some(&ledger), 0);
        for skip in 0..=max {
            assert_eq!(
                slice_ast(&node, max, &plugins, Some(&ledger), skip),
                reference,
                "skip = {skip}"
            );
        }
    }

    #[test]
    fn append_matches_fresh_slice_and_keeps_untouched_subtrees() {
        let node = AstNode::branch(
            NodeKind::Blockquote,
            vec![
                AstNode::paragraph(vec![AstNode::text("first para")]),
                AstNode::paragraph(vec![AstNode::text("second para")]),
            ],
        );
        let plugins = PluginRegistry::empty();

        let base = slice_ast(&node, 13, &plugins, None, 0).unwrap();
        let grown = append_to_ast(Some(&base), &node, 13, 16, &plugins, None).unwrap();

        assert_eq!(grown, slice_ast(&node, 16, &plugins, None, 0).unwrap());
        assert!(Arc::ptr_eq(&grown.children()[0], &base.children()[0]));
        assert_eq!(grown.plain_text(), "first parasecond");
    }

    #[test]
    fn append_materialises_newly_reached_children() {
        let node = AstNode::paragraph(vec![
            AstNode::text("ab"),
            strong("cd"),
            AstNode::text("ef"),
        ]);
        let plugins = PluginRegistry::empty();

        let base = slice_ast(&node, 1, &plugins, None, 0).unwrap();
        assert_eq!(base.children().len(), 1);

        let grown = append_to_ast(Some(&base), &node, 1, 5, &plugins, None).unwrap();
        assert_eq!(grown.children().len(), 3);
        assert!(Arc::ptr_eq(&grown.children()[1], &node.children()[1]));
        assert_eq!(grown.plain_text(), "abcde");
    }

    #[test]
    fn merge_falls_back_to_fresh_slice_on_type_change() {
        let base = AstNode::paragraph(vec![AstNode::text("ab")]);
        let full = AstNode::branch(NodeKind::Heading { depth: 1 }, vec![AstNode::text("abc")]);
        assert!(Arc::ptr_eq(
            &merge_slices(&base, &full, MergeMode::Trusting),
            &full
        ));
    }

    #[test]
    fn merge_falls_back_when_fresh_slice_has_fewer_children() {
        let base = AstNode::paragraph(vec![AstNode::text("a"), AstNode::text("b")]);
        let full = AstNode::paragraph(vec![AstNode::text("ab")]);
        assert!(Arc::ptr_eq(
            &merge_slices(&base, &full, MergeMode::Trusting),
            &full
        ));
    }

    #[test]
    fn verified_merge_replaces_stale_children() {
        let base = AstNode::paragraph(vec![AstNode::text("old"), AstNode::text("x")]);
        let full = AstNode::paragraph(vec![AstNode::text("new"), AstNode::text("xy")]);

        let trusting = merge_slices(&base, &full, MergeMode::Trusting);
        assert_eq!(trusting.plain_text(), "oldxy");

        let verified = merge_slices(&base, &full, MergeMode::Verified);
        assert_eq!(verified.plain_text(), "newxy");
    }

    #[test]
    fn chunks_annotate_only_the_animating_tail() {
        let node = AstNode::paragraph(vec![AstNode::text("Hello world")]);
        let now = Instant::now();
        let mut ledger = ChunkLedger::new();
        ledger.record(0, 6, now);
        ledger.expire(now + Duration::from_secs(1), Duration::from_millis(500));
        ledger.record(6, 9, now + Duration::from_secs(1));

        let sliced = slice_ast(&node, 9, &PluginRegistry::empty(), Some(&ledger), 0).unwrap();
        let leaf = sliced.children()[0].as_leaf().unwrap();

        assert_eq!(leaf.value, "Hello wor");
        assert_eq!(leaf.stable_length, Some(6));
        assert_eq!(
            leaf.chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
            vec!["wor"]
        );
    }

    #[test]
    fn ledger_expiry_folds_old_chunks_into_stable_prefix() {
        let start = Instant::now();
        let mut ledger = ChunkLedger::new();
        ledger.record(0, 3, start);
        ledger.record(3, 5, start + Duration::from_millis(300));

        ledger.expire(start + Duration::from_millis(400), Duration::from_millis(200));
        assert_eq!(ledger.stable_chars(), 3);
        assert_eq!(ledger.chunks().len(), 1);

        ledger.expire(start + Duration::from_secs(5), Duration::from_millis(200));
        assert_eq!(ledger.stable_chars(), 5);
        assert!(ledger.is_empty());
    }

    #[test]
    fn ledger_gap_resets_contiguity() {
        let now = Instant::now();
        let mut ledger = ChunkLedger::new();
        ledger.record(0, 2, now);
        ledger.record(10, 12, now);
        assert_eq!(ledger.stable_chars(), 10);
        assert_eq!(ledger.chunks().len(), 1);
    }
}
