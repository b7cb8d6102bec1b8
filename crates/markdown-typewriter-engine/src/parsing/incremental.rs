use std::ops::Range;

use crate::ast::{AstNode, NodeKind, NodeRef};
use crate::block::{BlockId, BlockStatus, SourceBlock};
use crate::parsing::segment::{Fence, Region, lines_with_spans, segment};
use crate::parsing::tree::{Delimiter, ParsedBlock, parse_blocks};

/// Blocks reported by one [`IncrementalParser`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseUpdate {
    /// Blocks that became Completed during this call.
    pub completed: Vec<SourceBlock>,
    /// Every block that is still Pending, in document order.
    pub pending: Vec<SourceBlock>,
}

impl ParseUpdate {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.pending.is_empty()
    }

    /// Completed blocks followed by the pending tail.
    pub fn into_blocks(self) -> Vec<SourceBlock> {
        let mut blocks = self.completed;
        blocks.extend(self.pending);
        blocks
    }
}

/// A block re-derived from the unstable tail, before classification.
#[derive(Debug)]
struct Candidate {
    id: BlockId,
    range: Range<usize>,
    node: NodeRef,
    delimiter: Delimiter,
    /// Sub-block of a container whose closer has not arrived.
    provisional: bool,
}

/// Streaming Markdown parser with stable block identity.
///
/// ## 1. Stable prefix
/// - **Completed blocks are frozen**: once a block is proven final it is
///   stored and never parsed again
/// - **Tail re-derivation**: each [`append`](Self::append) re-parses only the
///   text after `stable_offset`, the start of the line holding the first
///   unfinished block
///
/// ## 2. Completion
/// - **Closed siblings**: a top-level block followed by another top-level block
///   can no longer change, once that block's opening line is terminated or a
///   blank line separates the two
/// - **Self-delimiting tail**: the last block completes early only if it ends
///   itself (closed fence, ATX heading, thematic break, closed container) and
///   its line is terminated
///
/// ## 3. Identity
/// - **Offsets as ids**: a block's id is the byte offset of its first byte, so
///   it survives any growth of the buffer behind it
/// - **Container collapse**: while a `:::` container is open its inner blocks
///   are surfaced as Pending, the first under the container's own id; the
///   closed container later replaces them under that id
///
/// ```rust
/// # use markdown_typewriter_engine::parsing::IncrementalParser;
/// let mut parser = IncrementalParser::new();
/// let update = parser.append("# Title\n\nHello");
/// assert_eq!(update.completed.len(), 1);
/// assert_eq!(update.pending.len(), 1);
///
/// let update = parser.finalize();
/// assert_eq!(update.completed.len(), 1);
/// assert!(update.pending.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct IncrementalParser {
    buffer: String,
    stable_offset: usize,
    completed: Vec<SourceBlock>,
    pending: Vec<SourceBlock>,
    finalized: bool,
}

impl IncrementalParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and re-derives the unstable tail.
    pub fn append(&mut self, chunk: &str) -> ParseUpdate {
        self.buffer.push_str(chunk);
        self.finalized = false;
        self.reparse(false)
    }

    /// Marks the stream as ended: every remaining block becomes Completed.
    ///
    /// Later appends are still accepted and start new blocks.
    pub fn finalize(&mut self) -> ParseUpdate {
        let update = self.reparse(true);
        self.stable_offset = self.buffer.len();
        self.finalized = true;
        update
    }

    pub fn reset(&mut self) {
        log::debug!("parser reset after {} bytes", self.buffer.len());
        *self = Self::default();
    }

    /// One-shot parse of `content`.
    ///
    /// Returns every block of the document as Completed.
    pub fn render(&mut self, content: &str) -> ParseUpdate {
        self.reset();
        self.append(content);
        self.finalize();
        ParseUpdate {
            completed: self.completed.clone(),
            pending: Vec::new(),
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Byte offset before which nothing will be parsed again.
    pub fn stable_offset(&self) -> usize {
        self.stable_offset
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn completed_blocks(&self) -> &[SourceBlock] {
        &self.completed
    }

    pub fn pending_blocks(&self) -> &[SourceBlock] {
        &self.pending
    }

    /// Current snapshot: every completed block followed by the pending tail.
    pub fn blocks(&self) -> Vec<SourceBlock> {
        self.completed
            .iter()
            .chain(&self.pending)
            .cloned()
            .collect()
    }

    fn reparse(&mut self, finalizing: bool) -> ParseUpdate {
        let candidates = self.derive_tail(finalizing);
        let count = candidates.len();
        let mut newly_completed = Vec::new();
        let mut pending = Vec::new();
        let mut stable = self.stable_offset;

        for (i, candidate) in candidates.iter().enumerate() {
            let next = candidates.get(i + 1);
            let done = pending.is_empty()
                && (finalizing
                    || (!candidate.provisional
                        && match next {
                            Some(next) => self.closed_by(candidate, next),
                            None => self.closes_itself(candidate),
                        }));

            if done {
                stable = match next {
                    Some(next) => self.line_start(next.range.start),
                    None => self.line_end(candidate.range.end),
                }
                .max(stable);
                newly_completed.push(SourceBlock::new(
                    candidate.id.clone(),
                    candidate.node.clone(),
                    BlockStatus::Completed,
                ));
            } else {
                pending.push(SourceBlock::new(
                    candidate.id.clone(),
                    candidate.node.clone(),
                    BlockStatus::Pending,
                ));
            }
        }

        if stable != self.stable_offset {
            log::debug!(
                "stable offset {} -> {} ({} of {count} tail blocks completed)",
                self.stable_offset,
                stable,
                newly_completed.len()
            );
            self.stable_offset = stable;
        }
        self.completed.extend(newly_completed.iter().cloned());
        self.pending = pending.clone();

        ParseUpdate {
            completed: newly_completed,
            pending,
        }
    }

    /// Parses everything after the stable offset into candidate blocks.
    fn derive_tail(&self, finalizing: bool) -> Vec<Candidate> {
        let base = self.stable_offset;
        let tail = &self.buffer[base..];
        let mut candidates = Vec::new();

        for region in segment(tail, finalizing) {
            match region {
                Region::Markdown(range) => {
                    let offset = base + range.start;
                    for block in parse_blocks(&tail[range]) {
                        candidates.push(Candidate::settled(shift(block, offset)));
                    }
                }
                Region::Container(container) => {
                    let inner_offset = base + container.inner.start;
                    let inner = parse_fragment(&tail[container.inner.clone()]);
                    let start = base + container.start;

                    if container.closed || finalizing {
                        let children = inner.into_iter().map(|b| b.node).collect();
                        candidates.push(Candidate {
                            id: BlockId::from_offset(start),
                            range: start..base + container.end,
                            node: AstNode::branch(
                                NodeKind::ContainerDirective {
                                    name: container.name,
                                    label: container.label,
                                },
                                children,
                            ),
                            delimiter: Delimiter::Container,
                            provisional: false,
                        });
                    } else {
                        for (k, block) in inner.into_iter().enumerate() {
                            let block = shift(block, inner_offset);
                            let id = if k == 0 {
                                BlockId::from_offset(start)
                            } else {
                                BlockId::from_offset(block.range.start)
                            };
                            candidates.push(Candidate {
                                id,
                                range: block.range,
                                node: block.node,
                                delimiter: block.delimiter,
                                provisional: true,
                            });
                        }
                    }
                }
            }
        }

        dedup_ids(&mut candidates);
        candidates
    }

    /// Whether `next` has settled enough to close `candidate`.
    ///
    /// A half-typed opener (`#`, `***`, `<div`) can interrupt a paragraph and
    /// then fall back into it as a lazy continuation once the line goes on.
    /// A blank line in between, or a terminated opening line, rules that out.
    fn closed_by(&self, candidate: &Candidate, next: &Candidate) -> bool {
        self.closes_itself(candidate)
            || self.blank_line_between(candidate.range.end, next.range.start)
            || self.buffer[next.range.start..].contains('\n')
    }

    fn blank_line_between(&self, end: usize, next_start: usize) -> bool {
        let from = self.line_end(end);
        let to = self.line_start(next_start);
        from < to
            && self.buffer[from..to]
                .split_inclusive('\n')
                .any(|line| line.trim().is_empty())
    }

    /// Whether the last block of the buffer can already be proven final.
    fn closes_itself(&self, candidate: &Candidate) -> bool {
        let rest = &self.buffer[candidate.range.start..];
        match candidate.delimiter {
            Delimiter::None => false,
            Delimiter::Container => true,
            Delimiter::AtxHeading | Delimiter::ThematicBreak => rest.contains('\n'),
            Delimiter::FencedCode => fence_is_closed(rest),
        }
    }

    fn line_start(&self, offset: usize) -> usize {
        self.buffer[..offset].rfind('\n').map_or(0, |i| i + 1)
    }

    fn line_end(&self, offset: usize) -> usize {
        if self.buffer[..offset].ends_with('\n') {
            return offset;
        }
        self.buffer[offset..]
            .find('\n')
            .map_or(self.buffer.len(), |i| offset + i + 1)
    }
}

impl Candidate {
    fn settled(block: ParsedBlock) -> Self {
        Self {
            id: BlockId::from_offset(block.range.start),
            range: block.range,
            node: block.node,
            delimiter: block.delimiter,
            provisional: false,
        }
    }
}

fn shift(mut block: ParsedBlock, offset: usize) -> ParsedBlock {
    block.range = block.range.start + offset..block.range.end + offset;
    block
}

/// Gives repeated ids a suffix so a snapshot never holds the same id twice.
fn dedup_ids(candidates: &mut [Candidate]) {
    for i in 1..candidates.len() {
        let (before, rest) = candidates.split_at_mut(i);
        let current = &mut rest[0];
        let repeats = before.iter().filter(|c| c.id == current.id).count();
        if repeats > 0 {
            current.id = BlockId::new(format!("{}.{repeats}", current.id));
        }
    }
}

/// Parses a complete fragment, nested containers included.
fn parse_fragment(text: &str) -> Vec<ParsedBlock> {
    let mut blocks = Vec::new();
    for region in segment(text, true) {
        match region {
            Region::Markdown(range) => {
                let offset = range.start;
                blocks.extend(
                    parse_blocks(&text[range])
                        .into_iter()
                        .map(|b| shift(b, offset)),
                );
            }
            Region::Container(container) => {
                let children = parse_fragment(&text[container.inner.clone()])
                    .into_iter()
                    .map(|b| b.node)
                    .collect();
                blocks.push(ParsedBlock {
                    range: container.start..container.end,
                    node: AstNode::branch(
                        NodeKind::ContainerDirective {
                            name: container.name,
                            label: container.label,
                        },
                        children,
                    ),
                    delimiter: Delimiter::Container,
                });
            }
        }
    }
    blocks
}

/// Whether the fenced code block starting at the head of `text` has a
/// terminated closing fence.
fn fence_is_closed(text: &str) -> bool {
    let mut lines = lines_with_spans(text);
    let Some(fence) = lines.next().and_then(|(_, line)| Fence::open(line)) else {
        return false;
    };
    lines.any(|(_, line)| line.ends_with('\n') && fence.closes(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeType;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn ids(blocks: &[SourceBlock]) -> Vec<&str> {
        blocks.iter().map(|b| b.id.as_str()).collect()
    }

    const DOCUMENT: &str = "# Title\n\nSome *emphasis* and `code`.\n\n```rust\nfn main() {}\n```\n\n:::note[Heads up]\nInside **note**.\n\nSecond.\n:::\n\n- a\n- [x] b\n\n$$\nx^2\n$$\n\n---\n\nThe end.\n";

    #[test]
    fn trailing_paragraph_stays_pending() {
        let mut parser = IncrementalParser::new();
        let update = parser.append("First paragraph.\n\nSecond");

        assert_eq!(ids(&update.completed), vec!["0"]);
        assert_eq!(ids(&update.pending), vec!["18"]);
        assert_eq!(parser.stable_offset(), 18);
    }

    #[test]
    fn block_ids_survive_growth() {
        let mut parser = IncrementalParser::new();
        parser.append("Hel");
        let before = parser.blocks();
        parser.append("lo wor");
        let after = parser.blocks();

        assert_eq!(ids(&before), ids(&after));
        assert_eq!(after[0].node.plain_text(), "Hello wor");
    }

    #[rstest]
    #[case::atx_heading("# Title\n", true)]
    #[case::unterminated_heading("# Tit", false)]
    #[case::closed_fence("```\ncode\n```\n", true)]
    #[case::closer_still_typing("```\ncode\n``", false)]
    #[case::thematic_break("***\n", true)]
    #[case::paragraph("Just text\n", false)]
    #[case::display_math("$$\nx\n$$\n", false)]
    fn last_block_completes_only_when_self_delimiting(
        #[case] text: &str,
        #[case] completed: bool,
    ) {
        let mut parser = IncrementalParser::new();
        let update = parser.append(text);
        assert_eq!(update.completed.len(), usize::from(completed), "{text:?}");
        assert_eq!(update.pending.len(), usize::from(!completed), "{text:?}");
    }

    #[test]
    fn indented_block_keeps_its_indentation_after_the_cut() {
        let mut parser = IncrementalParser::new();
        parser.append("para\n\n    indented code");
        assert_eq!(parser.stable_offset(), 6);
        assert_eq!(parser.pending_blocks()[0].node.node_type(), NodeType::Code);
    }

    #[test]
    fn open_container_surfaces_sub_blocks_then_collapses() {
        let mut parser = IncrementalParser::new();
        let update = parser.append(":::note\nA\n\nB\n");
        assert!(update.completed.is_empty());
        assert_eq!(ids(&update.pending), vec!["0", "11"]);

        let update = parser.append(":::\n");
        assert_eq!(ids(&update.completed), vec!["0"]);
        assert!(update.pending.is_empty());

        let container = &update.completed[0].node;
        assert_eq!(
            container.kind,
            NodeKind::ContainerDirective {
                name: "note".into(),
                label: None,
            }
        );
        assert_eq!(container.plain_text(), "AB");
    }

    #[test]
    fn finalize_force_closes_open_container() {
        let mut parser = IncrementalParser::new();
        parser.append(":::tip\nhello");
        let update = parser.finalize();

        assert_eq!(ids(&update.completed), vec!["0"]);
        assert_eq!(
            update.completed[0].node.node_type(),
            NodeType::ContainerDirective
        );
        assert!(parser.is_finalized());
    }

    #[rstest]
    #[case::document(DOCUMENT)]
    #[case::heading_marker_turns_lazy("para\n#x\n")]
    #[case::html_opener_turns_lazy("para\n<divx>\n")]
    #[case::thematic_break_turns_lazy("para\n***x\n")]
    #[case::interrupting_heading("para\n# Heading\ntail\n")]
    fn streaming_matches_one_shot_render(#[case] document: &str) {
        let expected = IncrementalParser::new().render(document).completed;

        let mut parser = IncrementalParser::new();
        for ch in document.chars() {
            parser.append(&ch.to_string());
        }
        parser.finalize();

        assert_eq!(parser.completed_blocks(), expected.as_slice());
    }

    #[test]
    fn unterminated_opener_keeps_the_paragraph_open() {
        let mut parser = IncrementalParser::new();
        let update = parser.append("para\n#");
        assert!(update.completed.is_empty());
        assert_eq!(ids(&update.pending), vec!["0", "5"]);
        assert_eq!(parser.stable_offset(), 0);

        let update = parser.append("x");
        assert!(update.completed.is_empty());
        assert_eq!(ids(&update.pending), vec!["0"]);
        assert_eq!(update.pending[0].node.plain_text(), "para\n#x");
    }

    #[test]
    fn terminated_opener_closes_the_paragraph() {
        let mut parser = IncrementalParser::new();
        let update = parser.append("para\n# Heading\n");
        assert_eq!(ids(&update.completed), vec!["0", "5"]);
        assert_eq!(parser.stable_offset(), 15);
    }

    #[test]
    fn completed_ids_never_return_as_pending() {
        let mut parser = IncrementalParser::new();
        let mut seen_completed = Vec::new();

        for chunk in DOCUMENT.as_bytes().chunks(3) {
            let chunk = std::str::from_utf8(chunk).unwrap();
            let update = parser.append(chunk);
            for block in &update.pending {
                assert!(
                    !seen_completed.contains(&block.id),
                    "{} resurrected as pending",
                    block.id
                );
            }
            seen_completed.extend(update.completed.into_iter().map(|b| b.id));
        }
    }

    #[test]
    fn render_is_idempotent() {
        let mut parser = IncrementalParser::new();
        let first = parser.render(DOCUMENT);
        let second = parser.render(DOCUMENT);
        assert_eq!(first, second);
        assert!(first.pending.is_empty());
    }

    #[test]
    fn snapshot_ids_are_unique() {
        let mut parser = IncrementalParser::new();
        parser.append(DOCUMENT);
        let blocks = parser.blocks();
        let mut seen = ids(&blocks);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), blocks.len());
    }

    #[test]
    fn text_is_preserved_across_blocks() {
        let mut parser = IncrementalParser::new();
        parser.append("alpha\n\nbeta gamma\n\ndelta");
        let text: Vec<String> = parser.blocks().iter().map(|b| b.node.plain_text()).collect();
        assert_eq!(text, vec!["alpha", "beta gamma", "delta"]);
    }

    #[test]
    fn append_after_finalize_starts_new_blocks() {
        let mut parser = IncrementalParser::new();
        parser.append("one\n");
        parser.finalize();
        let update = parser.append("\ntwo");

        assert!(!parser.is_finalized());
        assert_eq!(ids(parser.completed_blocks()), vec!["0"]);
        assert_eq!(ids(&update.pending), vec!["5"]);
    }

    #[test]
    fn reset_clears_everything() {
        let mut parser = IncrementalParser::new();
        parser.append("# Heading\n\ntext");
        parser.reset();
        assert_eq!(parser.buffer(), "");
        assert!(parser.blocks().is_empty());
        assert_eq!(parser.stable_offset(), 0);
    }
}
