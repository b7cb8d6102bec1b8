//! Line scanner that splits text into plain Markdown regions and container
//! directive regions (`:::name` ... `:::`).
//!
//! `pulldown-cmark` has no notion of container directives, so they are carved
//! out here before the grammar sees the text. Fenced code is tracked so a
//! `:::` line inside a code block is left alone.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

fn opener_regex() -> &'static Regex {
    static OPENER: OnceLock<Regex> = OnceLock::new();
    OPENER.get_or_init(|| {
        Regex::new(
            r"^ {0,3}(?P<colons>:{3,})\s*(?P<name>[A-Za-z][\w-]*)(?:\[(?P<label>[^\]]*)\])?(?P<rest>.*)$",
        )
        .expect("Invalid directive opener regex")
    })
}

fn closer_regex() -> &'static Regex {
    static CLOSER: OnceLock<Regex> = OnceLock::new();
    CLOSER.get_or_init(|| {
        Regex::new(r"^ {0,3}(?P<colons>:{3,})\s*$").expect("Invalid directive closer regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceChar {
    Backtick,
    Tilde,
}

/// An open code fence: which character and how many of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fence {
    pub ch: FenceChar,
    pub len: usize,
}

impl Fence {
    /// Fence opener at the start of `line` (up to three spaces of indent).
    pub fn open(line: &str) -> Option<Self> {
        let t = strip_indent(line)?;
        let ch = match t.chars().next()? {
            '`' => FenceChar::Backtick,
            '~' => FenceChar::Tilde,
            _ => return None,
        };
        let marker = if ch == FenceChar::Backtick { '`' } else { '~' };
        let len = t.chars().take_while(|&c| c == marker).count();
        if len < 3 {
            return None;
        }
        // Backtick info strings may not contain backticks.
        if ch == FenceChar::Backtick && t[len..].contains('`') {
            return None;
        }
        Some(Self { ch, len })
    }

    /// Whether `line` closes this fence.
    pub fn closes(&self, line: &str) -> bool {
        match Self::open(line) {
            Some(other) => {
                let t = strip_indent(line).unwrap_or(line);
                other.ch == self.ch && other.len >= self.len && t[other.len..].trim().is_empty()
            }
            None => false,
        }
    }
}

fn strip_indent(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 { None } else { Some(&line[indent..]) }
}

/// A `:::name[label]` container and where its parts lie in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRegion {
    pub name: String,
    pub label: Option<String>,
    /// Start of the opener line.
    pub start: usize,
    /// Lines between opener and closer.
    pub inner: Range<usize>,
    /// End of the closer line (or of the text while still open).
    pub end: usize,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    Markdown(Range<usize>),
    Container(ContainerRegion),
}

struct Opener {
    colons: usize,
    name: String,
    label: Option<String>,
}

fn directive_opener(line: &str) -> Option<Opener> {
    let caps = opener_regex().captures(line.trim_end_matches(['\r', '\n']))?;
    let label = caps
        .name("label")
        .map(|m| m.as_str().trim().to_string())
        .or_else(|| {
            let rest = caps.name("rest").map_or("", |m| m.as_str()).trim();
            // `{key=value}` attribute blocks are not labels.
            (!rest.is_empty() && !rest.starts_with('{')).then(|| rest.to_string())
        })
        .filter(|l| !l.is_empty());
    Some(Opener {
        colons: caps["colons"].len(),
        name: caps["name"].to_string(),
        label,
    })
}

fn directive_closer(line: &str) -> Option<usize> {
    closer_regex()
        .captures(line.trim_end_matches(['\r', '\n']))
        .map(|caps| caps["colons"].len())
}

/// Lines of `text` with their byte spans, terminators included.
pub fn lines_with_spans(text: &str) -> impl Iterator<Item = (Range<usize>, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let span = offset..offset + line.len();
        offset = span.end;
        (span, line)
    })
}

#[derive(Debug)]
struct OpenContainer {
    name: String,
    label: Option<String>,
    start: usize,
    inner_start: usize,
}

/// Splits `text` into regions.
///
/// A closer line only counts once its newline has arrived (it could still turn
/// into a nested opener), unless `finalizing` says no more input is coming.
pub fn segment(text: &str, finalizing: bool) -> Vec<Region> {
    let mut regions = Vec::new();
    let mut markdown_start = 0;
    let mut fence: Option<Fence> = None;
    let mut open: Option<OpenContainer> = None;
    // Colon counts of directives nested inside the open top-level container.
    let mut depth: Vec<usize> = Vec::new();

    for (span, line) in lines_with_spans(text) {
        let terminated = line.ends_with('\n') || finalizing;

        if let Some(f) = fence {
            if terminated && f.closes(line) {
                fence = None;
            }
            continue;
        }
        if let Some(f) = Fence::open(line) {
            fence = Some(f);
            continue;
        }

        if open.is_none() {
            if let Some(opener) = directive_opener(line) {
                if span.start > markdown_start {
                    regions.push(Region::Markdown(markdown_start..span.start));
                }
                depth.push(opener.colons);
                open = Some(OpenContainer {
                    name: opener.name,
                    label: opener.label,
                    start: span.start,
                    inner_start: span.end,
                });
            }
        } else if let Some(opener) = directive_opener(line) {
            depth.push(opener.colons);
        } else if let Some(colons) = directive_closer(line)
            && terminated
            && depth.last().is_some_and(|&need| colons >= need)
        {
            depth.pop();
            if depth.is_empty()
                && let Some(c) = open.take()
            {
                regions.push(Region::Container(ContainerRegion {
                    name: c.name,
                    label: c.label,
                    start: c.start,
                    inner: c.inner_start..span.start,
                    end: span.end,
                    closed: true,
                }));
                markdown_start = span.end;
            }
        }
    }

    match open {
        Some(c) => regions.push(Region::Container(ContainerRegion {
            name: c.name,
            label: c.label,
            start: c.start,
            inner: c.inner_start.min(text.len())..text.len(),
            end: text.len(),
            closed: false,
        })),
        None if markdown_start < text.len() => {
            regions.push(Region::Markdown(markdown_start..text.len()));
        }
        None => {}
    }
    regions
}
