pub mod incremental;
pub mod segment;
pub mod tree;

pub use incremental::{IncrementalParser, ParseUpdate};

use crate::block::SourceBlock;

/// Convenience: parses a whole document at once into completed blocks.
pub fn parse_markdown(content: &str) -> Vec<SourceBlock> {
    IncrementalParser::new().render(content).completed
}
