use thiserror::Error;

/// Rejected transformer option values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("chars per tick must be at least 1")]
    ZeroCharsPerTick,

    #[error("chars per tick range is inverted: min {min} > max {max}")]
    InvertedRange { min: usize, max: usize },

    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("unknown effect: {0} (expected none, fade-in or typing)")]
    UnknownEffect(String),
}
