//! Display blocks to ratatui lines.

use markdown_typewriter_engine::{AstNode, BlockId, DisplayBlock, NodeKind};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

const CURSOR: &str = "▌";

/// Renders every revealed block, with a cursor after the `cursor` block.
pub fn render_blocks(blocks: &[DisplayBlock], cursor: Option<&BlockId>) -> Vec<Line<'static>> {
    let mut writer = Writer::default();
    for block in blocks {
        let Some(node) = &block.display_node else {
            continue;
        };
        writer.node(node, Style::default());
        writer.flush();
        if cursor == Some(&block.id) {
            writer.cursor();
        }
        writer.lines.push(Line::default());
    }
    writer.lines
}

#[derive(Default)]
struct Writer {
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    prefix: String,
}

fn dim() -> Style {
    Style::default().add_modifier(Modifier::DIM)
}

impl Writer {
    fn push(&mut self, text: &str, style: Style) {
        for (i, part) in text.split('\n').enumerate() {
            if i > 0 {
                self.newline();
            }
            if !part.is_empty() {
                self.spans.push(Span::styled(part.to_string(), style));
            }
        }
    }

    fn newline(&mut self) {
        let mut spans = Vec::with_capacity(self.spans.len() + 1);
        if !self.prefix.is_empty() {
            spans.push(Span::styled(self.prefix.clone(), dim()));
        }
        spans.append(&mut self.spans);
        self.lines.push(Line::from(spans));
    }

    fn flush(&mut self) {
        if !self.spans.is_empty() {
            self.newline();
        }
    }

    fn cursor(&mut self) {
        let cursor = Span::styled(CURSOR, Style::default().add_modifier(Modifier::SLOW_BLINK));
        match self.lines.last_mut() {
            Some(line) => line.spans.push(cursor),
            None => self.lines.push(Line::from(vec![cursor])),
        }
    }

    fn indented(&mut self, prefix: &str, body: impl FnOnce(&mut Self)) {
        let saved = self.prefix.len();
        self.prefix.push_str(prefix);
        body(self);
        self.flush();
        self.prefix.truncate(saved);
    }

    fn children(&mut self, node: &AstNode, style: Style) {
        for child in node.children() {
            self.node(child, style);
        }
    }

    fn node(&mut self, node: &AstNode, style: Style) {
        let value = node.value().unwrap_or_default();
        match &node.kind {
            NodeKind::Paragraph => {
                self.children(node, style);
                self.flush();
            }
            NodeKind::Heading { depth } => {
                let heading = style.fg(Color::Cyan).add_modifier(Modifier::BOLD);
                self.push(&format!("{} ", "#".repeat(usize::from(*depth))), heading);
                self.children(node, heading);
                self.flush();
            }
            NodeKind::Blockquote => self.indented("│ ", |w| w.children(node, style)),
            NodeKind::List { ordered, start, .. } => {
                for (i, item) in node.children().iter().enumerate() {
                    let marker = if *ordered {
                        format!("{}. ", start.unwrap_or(1) + i as u64)
                    } else {
                        "• ".to_string()
                    };
                    self.indented("  ", |w| {
                        w.push(&marker, dim());
                        w.node(item, style);
                    });
                }
            }
            NodeKind::ListItem { checked } => {
                if let Some(checked) = checked {
                    self.push(if *checked { "[x] " } else { "[ ] " }, dim());
                }
                self.children(node, style);
            }
            NodeKind::Code { lang, .. } => {
                self.push(&format!("```{}", lang.as_deref().unwrap_or_default()), dim());
                self.flush();
                for line in value.split('\n') {
                    self.push(line, Style::default().fg(Color::Yellow));
                    self.newline();
                }
                self.push("```", dim());
                self.flush();
            }
            NodeKind::Math => {
                self.push("$$ ", dim());
                self.push(value.trim(), Style::default().fg(Color::Magenta));
                self.push(" $$", dim());
                self.flush();
            }
            NodeKind::Html => {
                self.push(value, dim());
                self.flush();
            }
            NodeKind::ThematicBreak => {
                self.push(&"─".repeat(24), dim());
                self.flush();
            }
            NodeKind::Table { .. } => {
                for row in node.children() {
                    let header = matches!(row.kind, NodeKind::TableRow { header: true });
                    let cell_style = if header {
                        style.add_modifier(Modifier::BOLD)
                    } else {
                        style
                    };
                    for (i, cell) in row.children().iter().enumerate() {
                        if i > 0 {
                            self.push(" │ ", dim());
                        }
                        self.children(cell, cell_style);
                    }
                    self.flush();
                }
            }
            NodeKind::TableRow { .. } | NodeKind::TableCell => self.children(node, style),
            NodeKind::ContainerDirective { name, label } => {
                let title = match label {
                    Some(label) => format!("┌ {name}: {label}"),
                    None => format!("┌ {name}"),
                };
                self.push(&title, dim().add_modifier(Modifier::BOLD));
                self.flush();
                self.indented("│ ", |w| w.children(node, style));
                self.push("└", dim());
                self.flush();
            }
            NodeKind::FootnoteDefinition { label } => {
                self.push(&format!("[^{label}]: "), dim());
                self.children(node, style);
                self.flush();
            }
            NodeKind::Text => self.push(value, style),
            NodeKind::Emphasis => self.children(node, style.add_modifier(Modifier::ITALIC)),
            NodeKind::Strong => self.children(node, style.add_modifier(Modifier::BOLD)),
            NodeKind::Delete => self.children(node, style.add_modifier(Modifier::CROSSED_OUT)),
            NodeKind::InlineCode => self.push(value, style.fg(Color::Yellow)),
            NodeKind::InlineMath => self.push(value, style.fg(Color::Magenta)),
            NodeKind::InlineHtml => self.push(value, style.add_modifier(Modifier::DIM)),
            NodeKind::Link { .. } => self.children(
                node,
                style.fg(Color::Blue).add_modifier(Modifier::UNDERLINED),
            ),
            NodeKind::Image { alt, .. } => {
                self.push(&format!("[image: {alt}]"), style.fg(Color::Cyan))
            }
            NodeKind::Break => self.newline(),
            NodeKind::FootnoteReference { label } => {
                self.push(&format!("[^{label}]"), style.fg(Color::Cyan))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use markdown_typewriter_engine::{BlockId, parse_markdown};

    fn plain(lines: &[Line<'_>]) -> String {
        lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim_end()
            .to_string()
    }

    fn display(markdown: &str) -> Vec<DisplayBlock> {
        parse_markdown(markdown)
            .into_iter()
            .map(|block| DisplayBlock {
                id: block.id,
                display_node: Some(block.node),
                is_display_complete: true,
            })
            .collect()
    }

    #[test]
    fn renders_common_blocks() {
        let blocks = display(
            "# Title\n\nSome **bold** text.\n\n> quoted\n\n- one\n- [x] two\n\n```rust\nlet x = 1;\n```\n",
        );
        insta::assert_snapshot!(plain(&render_blocks(&blocks, None)), @r"
        # Title

        Some bold text.

        │ quoted

          • one
          • [x] two

        ```rust
        let x = 1;
        ```
        ");
    }

    #[test]
    fn renders_containers_with_a_frame() {
        let blocks = display(":::note[Heads up]\ninside\n:::\n");
        insta::assert_snapshot!(plain(&render_blocks(&blocks, None)), @r"
        ┌ note: Heads up
        │ inside
        └
        ");
    }

    #[test]
    fn cursor_follows_the_current_block() {
        let blocks = display("first\n\nsecond\n");
        let second = BlockId::from_offset(7);
        let rendered = plain(&render_blocks(&blocks, Some(&second)));
        assert!(rendered.contains("second▌"), "{rendered}");
        assert!(!rendered.contains("first▌"));
    }

    #[test]
    fn unrevealed_blocks_are_skipped() {
        let blocks = vec![DisplayBlock {
            id: BlockId::from_offset(0),
            display_node: None,
            is_display_complete: false,
        }];
        assert!(render_blocks(&blocks, None).is_empty());
    }
}
