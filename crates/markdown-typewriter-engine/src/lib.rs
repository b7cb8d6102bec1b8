pub mod ast;
pub mod block;
pub mod error;
pub mod parsing;
pub mod plugins;
pub mod reveal;
pub mod transform;

// Re-export key types for easier usage
pub use ast::{AstNode, Leaf, NodeBody, NodeKind, NodeRef, NodeType, TextChunk};
pub use block::{BlockId, BlockStatus, DisplayBlock, SourceBlock};
pub use error::OptionsError;
pub use parsing::{IncrementalParser, ParseUpdate, parse_markdown};
pub use plugins::{PluginRegistry, RevealPlugin};
pub use reveal::{ChunkLedger, append_to_ast, count_chars, slice_ast};
pub use transform::{
    AnimationEffect, BlockTransformer, CharsPerTick, OptionsPatch, TransformerOptions,
};
