use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use markdown_typewriter_engine::{
    AnimationEffect, BlockTransformer, CharsPerTick, IncrementalParser, PluginRegistry,
    TransformerOptions, append_to_ast, count_chars, parse_markdown, slice_ast,
};
use std::hint::black_box;

fn generate_markdown_content(size: usize) -> String {
    let base = "# Title\n\nParagraph with **some** content and `code`.\n\n- Bullet point\n  - Nested item\n- Another item\n\n```rust\nfn example() {\n    println!(\"Hello\");\n}\n```\n\n";
    base.repeat(size)
}

fn bench_slicing(c: &mut Criterion) {
    let mut group = c.benchmark_group("slicing");
    group.sample_size(20);

    let plugins = PluginRegistry::builtin();
    let blocks = parse_markdown(&generate_markdown_content(20));
    let paragraph = blocks
        .iter()
        .find(|b| b.node.children().len() > 1)
        .map(|b| b.node.clone())
        .unwrap();
    let total = count_chars(&paragraph, &plugins);

    group.bench_function("slice_from_scratch", |b| {
        b.iter(|| {
            for max in 0..=total {
                black_box(slice_ast(&paragraph, max, &plugins, None, 0));
            }
        });
    });

    group.bench_function("append_per_tick", |b| {
        b.iter(|| {
            let mut shown = None;
            for end in 1..=total {
                shown = append_to_ast(shown.as_ref(), &paragraph, end - 1, end, &plugins, None);
            }
            black_box(shown);
        });
    });

    group.finish();
}

fn bench_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming");
    group.sample_size(10);

    for size in [1, 10] {
        let content = generate_markdown_content(size);
        group.bench_with_input(BenchmarkId::new("parse_chunks", size), &content, |b, content| {
            b.iter(|| {
                let mut parser = IncrementalParser::new();
                for line in content.split_inclusive('\n') {
                    black_box(parser.append(line));
                }
                black_box(parser.finalize());
            });
        });

        group.bench_with_input(BenchmarkId::new("reveal", size), &content, |b, content| {
            let blocks = parse_markdown(content);
            b.iter(|| {
                let mut transformer = BlockTransformer::new(TransformerOptions {
                    chars_per_tick: CharsPerTick::Fixed(4),
                    effect: AnimationEffect::Typing,
                    seed: Some(1),
                    ..TransformerOptions::default()
                })
                .unwrap();
                transformer.push(&blocks);
                while transformer.tick() {}
                black_box(transformer.display_blocks());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_slicing, bench_streaming);
criterion_main!(benches);
