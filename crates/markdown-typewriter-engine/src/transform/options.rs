use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;

use crate::error::OptionsError;
use crate::plugins::PluginRegistry;

/// How many units a tick reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsPerTick {
    Fixed(usize),
    /// Inclusive range sampled once per tick.
    Range { min: usize, max: usize },
}

impl CharsPerTick {
    pub fn validate(&self) -> Result<(), OptionsError> {
        match *self {
            CharsPerTick::Fixed(0) | CharsPerTick::Range { min: 0, .. } => {
                Err(OptionsError::ZeroCharsPerTick)
            }
            CharsPerTick::Range { min, max } if min > max => {
                Err(OptionsError::InvertedRange { min, max })
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn sample(&self, rng: &mut impl Rng) -> usize {
        match *self {
            CharsPerTick::Fixed(n) => n,
            CharsPerTick::Range { min, max } => rng.random_range(min..=max),
        }
    }
}

impl Default for CharsPerTick {
    fn default() -> Self {
        CharsPerTick::Fixed(1)
    }
}

/// What a renderer is expected to do with revealed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimationEffect {
    /// Blocks are shown in full as soon as they arrive.
    None,
    /// Text leaves carry chunk metadata for fading in each step.
    FadeIn,
    /// A cursor follows the current block.
    #[default]
    Typing,
}

impl AnimationEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimationEffect::None => "none",
            AnimationEffect::FadeIn => "fade-in",
            AnimationEffect::Typing => "typing",
        }
    }
}

impl fmt::Display for AnimationEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnimationEffect {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(AnimationEffect::None),
            "fade-in" | "fadein" | "fade" => Ok(AnimationEffect::FadeIn),
            "typing" => Ok(AnimationEffect::Typing),
            _ => Err(OptionsError::UnknownEffect(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformerOptions {
    pub chars_per_tick: CharsPerTick,
    pub tick_interval: Duration,
    pub effect: AnimationEffect,
    /// Stop ticking while the host reports itself hidden.
    pub pause_on_hidden: bool,
    /// Age after which fade-in chunks count as settled.
    pub fade_duration: Duration,
    pub plugins: PluginRegistry,
    /// Seed for `chars_per_tick` ranges; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for TransformerOptions {
    fn default() -> Self {
        Self {
            chars_per_tick: CharsPerTick::default(),
            tick_interval: Duration::from_millis(20),
            effect: AnimationEffect::default(),
            pause_on_hidden: true,
            fade_duration: Duration::from_millis(300),
            plugins: PluginRegistry::builtin(),
            seed: None,
        }
    }
}

impl TransformerOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        self.chars_per_tick.validate()
    }
}

/// Partial update for [`TransformerOptions`]; `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct OptionsPatch {
    pub chars_per_tick: Option<CharsPerTick>,
    pub tick_interval: Option<Duration>,
    pub effect: Option<AnimationEffect>,
    pub pause_on_hidden: Option<bool>,
    pub fade_duration: Option<Duration>,
    pub plugins: Option<PluginRegistry>,
}

impl OptionsPatch {
    pub fn validate(&self) -> Result<(), OptionsError> {
        match &self.chars_per_tick {
            Some(chars) => chars.validate(),
            None => Ok(()),
        }
    }
}
