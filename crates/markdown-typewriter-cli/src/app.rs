//! Replay state: feeds a file to the parser in chunks and forwards every
//! snapshot to the transformer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use markdown_typewriter_config::{CharsPerTickSetting, Config};
use markdown_typewriter_engine::{
    AnimationEffect, BlockTransformer, CharsPerTick, IncrementalParser, PluginRegistry,
    TransformerOptions,
};

/// Engine options described by a config file.
pub fn transformer_options(config: &Config) -> Result<TransformerOptions> {
    let chars_per_tick = match config.chars_per_tick {
        CharsPerTickSetting::Fixed(n) => CharsPerTick::Fixed(n),
        CharsPerTickSetting::Range([min, max]) => CharsPerTick::Range { min, max },
    };
    let options = TransformerOptions {
        chars_per_tick,
        tick_interval: Duration::from_millis(config.tick_interval_ms),
        effect: config.effect.parse::<AnimationEffect>()?,
        pause_on_hidden: config.pause_on_hidden,
        fade_duration: Duration::from_millis(config.fade_duration_ms),
        plugins: PluginRegistry::from_names(&config.plugins)?,
        seed: None,
    };
    options.validate()?;
    Ok(options)
}

pub struct App {
    source: String,
    /// Bytes of `source` handed to the parser so far.
    fed: usize,
    chunk_size: usize,
    chunk_interval: Duration,
    next_chunk_at: Option<Instant>,
    parser: IncrementalParser,
    pub transformer: BlockTransformer,
    dirty: Arc<AtomicBool>,
}

impl App {
    pub fn new(source: String, config: &Config, options: TransformerOptions) -> Result<Self> {
        let dirty = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&dirty);
        let transformer = BlockTransformer::new(options)
            .context("Invalid transformer options")?
            .on_change(move |_| flag.store(true, Ordering::Release))
            .on_all_complete(|| log::debug!("replay fully revealed"));

        Ok(Self {
            source,
            fed: 0,
            chunk_size: config.chunk_size.max(1),
            chunk_interval: Duration::from_millis(config.chunk_interval_ms),
            next_chunk_at: Some(Instant::now()),
            parser: IncrementalParser::new(),
            transformer,
            dirty,
        })
    }

    /// Feeds the next chunk when it is due. Returns whether the stream advanced.
    ///
    /// The stream waits while the transformer is paused.
    pub fn feed_due(&mut self, now: Instant) -> bool {
        if self.transformer.is_paused_state() {
            return false;
        }
        match self.next_chunk_at {
            Some(at) if now >= at => {
                self.feed_chunk();
                self.next_chunk_at = if self.parser.is_finalized() {
                    None
                } else {
                    Some(now + self.chunk_interval)
                };
                true
            }
            _ => false,
        }
    }

    /// Hands the rest of the file over at once.
    pub fn feed_all(&mut self) {
        while !self.parser.is_finalized() {
            self.feed_chunk();
        }
        self.next_chunk_at = None;
    }

    fn feed_chunk(&mut self) {
        if self.fed >= self.source.len() {
            self.parser.finalize();
        } else {
            let mut end = (self.fed + self.chunk_size).min(self.source.len());
            while !self.source.is_char_boundary(end) {
                end += 1;
            }
            self.parser.append(&self.source[self.fed..end]);
            self.fed = end;
        }
        self.transformer.push(&self.parser.blocks());
    }

    pub fn restart(&mut self) {
        log::debug!("restarting replay");
        self.parser.reset();
        self.transformer.reset();
        self.fed = 0;
        self.next_chunk_at = Some(Instant::now());
    }

    pub fn skip(&mut self) {
        self.feed_all();
        self.transformer.skip();
    }

    /// Space bar: also wakes a replay paused by lost focus.
    pub fn toggle_pause(&mut self) {
        if self.transformer.is_paused_state() {
            self.transformer.resume();
            self.transformer.set_visibility(true);
        } else {
            self.transformer.pause();
        }
        self.mark_dirty();
    }

    /// Earliest moment something needs doing, if anything is scheduled.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let chunk = self.next_chunk_at.filter(|_| !self.transformer.is_paused_state());
        match (chunk, self.transformer.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn progress(&self) -> (usize, usize) {
        (self.fed, self.source.len())
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> Config {
        Config {
            chunk_size: 4,
            ..Config::default()
        }
    }

    #[test]
    fn options_follow_the_config() {
        let config = Config {
            chars_per_tick: CharsPerTickSetting::Range([2, 4]),
            effect: "fade-in".to_string(),
            plugins: vec!["math".to_string()],
            ..Config::default()
        };
        let options = transformer_options(&config).unwrap();
        assert_eq!(options.chars_per_tick, CharsPerTick::Range { min: 2, max: 4 });
        assert_eq!(options.effect, AnimationEffect::FadeIn);
        assert_eq!(options.plugins.names(), vec!["math"]);
    }

    #[test]
    fn bad_config_values_are_errors() {
        let unknown_effect = Config {
            effect: "wobble".to_string(),
            ..Config::default()
        };
        assert!(transformer_options(&unknown_effect).is_err());

        let inverted = Config {
            chars_per_tick: CharsPerTickSetting::Range([5, 1]),
            ..Config::default()
        };
        assert!(transformer_options(&inverted).is_err());
    }

    #[test]
    fn feeding_respects_char_boundaries() {
        let config = config();
        let options = transformer_options(&config).unwrap();
        let mut app = App::new("héllo wörld".to_string(), &config, options).unwrap();

        app.feed_all();
        assert_eq!(app.progress(), (13, 13));
        assert_eq!(app.parser.buffer(), "héllo wörld");
    }

    #[test]
    fn space_resumes_a_replay_paused_by_focus_loss() {
        let config = config();
        let options = transformer_options(&config).unwrap();
        let mut app = App::new("one two three".to_string(), &config, options).unwrap();

        app.transformer.set_visibility(false);
        assert!(app.transformer.is_paused_state());

        app.toggle_pause();
        assert!(!app.transformer.is_paused_state());
    }

    #[test]
    fn paused_replay_stops_feeding() {
        let config = config();
        let options = transformer_options(&config).unwrap();
        let mut app = App::new("one two three".to_string(), &config, options).unwrap();

        app.toggle_pause();
        assert!(!app.feed_due(Instant::now() + Duration::from_secs(1)));
        assert_eq!(app.progress(), (0, 13));

        app.toggle_pause();
        assert!(app.feed_due(Instant::now() + Duration::from_secs(1)));
        assert_eq!(app.progress(), (4, 13));
    }

    #[test]
    fn skip_reveals_the_whole_file() {
        let config = config();
        let options = transformer_options(&config).unwrap();
        let mut app = App::new("# One\n\ntwo\n".to_string(), &config, options).unwrap();

        app.skip();
        let blocks = app.transformer.display_blocks();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.is_display_complete));
        assert_eq!(app.next_wakeup(), None);
    }
}
