use std::time::{Duration, Instant};

use markdown_typewriter_engine::{
    AnimationEffect, BlockStatus, BlockTransformer, CharsPerTick, DisplayBlock, IncrementalParser,
    SourceBlock, TransformerOptions, parse_markdown,
};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!(
        "{}/tests/fixtures/{name}.md",
        env!("CARGO_MANIFEST_DIR")
    ))
    .unwrap()
}

/// Splits on char boundaries, `size` bytes at a time or a little more.
fn chunks(text: &str, size: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + size).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        out.push(&text[start..end]);
        start = end;
    }
    out
}

fn outline(blocks: &[SourceBlock]) -> String {
    blocks
        .iter()
        .map(|block| {
            format!(
                "{} {:?} {:?} {:?}",
                block.id.as_str(),
                block.status,
                block.node.node_type(),
                block.node.plain_text()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn display_text(blocks: &[DisplayBlock]) -> Vec<String> {
    blocks
        .iter()
        .map(|block| {
            block
                .display_node
                .as_ref()
                .map(|node| node.plain_text())
                .unwrap_or_default()
        })
        .collect()
}

fn transformer(chars_per_tick: usize, effect: AnimationEffect) -> BlockTransformer {
    BlockTransformer::new(TransformerOptions {
        chars_per_tick: CharsPerTick::Fixed(chars_per_tick),
        effect,
        seed: Some(7),
        ..TransformerOptions::default()
    })
    .unwrap()
}

fn drain(transformer: &mut BlockTransformer) {
    for _ in 0..100_000 {
        if !transformer.tick() {
            return;
        }
    }
    panic!("transformer never settled");
}

#[test]
fn outline_of_a_short_document() {
    let blocks =
        parse_markdown("# Title\n\nSome *emph* text.\n\n- a\n- b\n\n```rust\nfn x() {}\n```\n");
    insta::assert_snapshot!(outline(&blocks), @r#"
    0 Completed Heading "Title"
    9 Completed Paragraph "Some emph text."
    28 Completed List "ab"
    37 Completed Code "fn x() {}"
    "#);
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(64)]
fn streaming_matches_one_shot_parse(#[case] size: usize) {
    let source = fixture("release_notes");
    let expected = parse_markdown(&source);

    let mut parser = IncrementalParser::new();
    for chunk in chunks(&source, size) {
        parser.append(chunk);
        assert!(parser.stable_offset() <= parser.buffer().len());
    }
    parser.finalize();

    assert_eq!(outline(parser.completed_blocks()), outline(&expected));
    assert!(parser.pending_blocks().is_empty());
}

#[test]
fn every_fixture_block_completes() {
    let blocks = parse_markdown(&fixture("release_notes"));
    assert!(blocks.iter().all(|b| b.status == BlockStatus::Completed));
    assert!(blocks.iter().all(|b| b.node.is_well_formed()));
    assert_eq!(blocks.len(), 9);
}

#[rstest]
#[case(AnimationEffect::Typing)]
#[case(AnimationEffect::FadeIn)]
#[case(AnimationEffect::None)]
fn streamed_document_reveals_in_full(#[case] effect: AnimationEffect) {
    let source = fixture("release_notes");
    let mut parser = IncrementalParser::new();
    let mut transformer = transformer(5, effect);

    for chunk in chunks(&source, 13) {
        parser.append(chunk);
        transformer.push(&parser.blocks());
        transformer.tick();
    }
    parser.finalize();
    transformer.push(&parser.blocks());
    drain(&mut transformer);

    let shown = transformer.display_blocks();
    let expected: Vec<String> = parse_markdown(&source)
        .iter()
        .map(|b| b.node.plain_text())
        .collect();
    assert_eq!(display_text(&shown), expected);
    assert!(shown.iter().all(|b| b.is_display_complete));
    assert!(!transformer.is_processing());
}

#[test]
fn unfinished_tail_is_shown_but_not_complete() {
    let mut parser = IncrementalParser::new();
    let mut transformer = transformer(3, AnimationEffect::Typing);

    parser.append("# Done\n\nstill typ");
    transformer.push(&parser.blocks());
    drain(&mut transformer);

    let shown = transformer.display_blocks();
    assert_eq!(display_text(&shown), vec!["Done", "still typ"]);
    assert_eq!(
        shown.iter().map(|b| b.is_display_complete).collect::<Vec<_>>(),
        vec![true, false]
    );

    parser.append("ing\n");
    parser.finalize();
    transformer.push(&parser.blocks());
    drain(&mut transformer);

    let shown = transformer.display_blocks();
    assert_eq!(display_text(&shown), vec!["Done", "still typing"]);
    assert!(shown.iter().all(|b| b.is_display_complete));
}

#[test]
fn poll_paces_the_reveal() {
    let mut transformer = BlockTransformer::new(TransformerOptions {
        chars_per_tick: CharsPerTick::Fixed(1),
        tick_interval: Duration::from_millis(10),
        ..TransformerOptions::default()
    })
    .unwrap();
    transformer.push(&parse_markdown("abcdef"));

    let start = transformer.next_deadline().unwrap();
    let mut now = start;
    for _ in 0..3 {
        assert!(transformer.poll(now));
        assert!(!transformer.poll(now));
        now += Duration::from_millis(10);
    }
    assert_eq!(display_text(&transformer.display_blocks()), vec!["abc"]);
    assert!(transformer.next_deadline().unwrap() <= now);

    transformer.skip();
    assert_eq!(transformer.next_deadline(), None);
    assert!(!transformer.poll(Instant::now() + Duration::from_secs(1)));
}
