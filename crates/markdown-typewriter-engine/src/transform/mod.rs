//! # Display Transformer
//!
//! Turns parser snapshots into a paced display list.
//!
//! ## Block lifecycle
//!
//! ```text
//! Queued ──tick──▶ Revealing ──full + Completed──▶ DisplayComplete
//!    │                 │
//!    └──── absent from the latest push: removed ────┘
//! ```
//!
//! - **One current block**: the first block that is not display-complete;
//!   later blocks wait in `Queued`
//! - **Held blocks**: a fully revealed block whose source is still Pending
//!   stays `Revealing` and current until a push brings more content or marks
//!   it Completed; the clock stops meanwhile
//! - **Late completion**: a held block that turns Completed finishes at once,
//!   without another tick
//!
//! ## Driving
//!
//! The transformer owns no thread or timer. A host either calls
//! [`BlockTransformer::tick`] from its own frame callback, or calls
//! [`BlockTransformer::poll`] in its event loop and sleeps until
//! [`BlockTransformer::next_deadline`].

mod options;
mod scheduler;

pub use options::{AnimationEffect, CharsPerTick, OptionsPatch, TransformerOptions};

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::ast::NodeRef;
use crate::block::{BlockId, BlockStatus, DisplayBlock, SourceBlock};
use crate::error::OptionsError;
use crate::plugins::PluginRegistry;
use crate::reveal::{ChunkLedger, MergeMode, Slicer};
use scheduler::Scheduler;

type ChangeListener = Box<dyn FnMut(&[DisplayBlock]) + Send>;
type CompleteListener = Box<dyn FnMut() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Revealing,
    DisplayComplete,
}

#[derive(Debug)]
struct BlockEntry {
    id: BlockId,
    source: NodeRef,
    status: BlockStatus,
    phase: Phase,
    /// Units revealed so far; never decreases.
    revealed: usize,
    total: usize,
    display: Option<NodeRef>,
    ledger: ChunkLedger,
}

impl BlockEntry {
    fn new(block: &SourceBlock, slicer: &Slicer<'_>) -> Self {
        Self {
            id: block.id.clone(),
            source: Arc::clone(&block.node),
            status: block.status,
            phase: Phase::Queued,
            revealed: 0,
            total: slicer.count(&block.node),
            display: None,
            ledger: ChunkLedger::new(),
        }
    }

    fn is_fully_revealed(&self) -> bool {
        self.revealed >= self.total
    }

    /// Revealing, fully shown, waiting on the parser.
    fn is_held(&self) -> bool {
        self.phase == Phase::Revealing
            && self.is_fully_revealed()
            && self.status == BlockStatus::Pending
    }

    /// Applies a newer snapshot of the same block.
    ///
    /// With `fade` set the re-cut keeps the chunk annotations of the
    /// still-animating text.
    fn update(&mut self, block: &SourceBlock, plugins: &PluginRegistry, fade: bool) {
        let was_held = self.is_held();

        if self.status == BlockStatus::Completed && block.status == BlockStatus::Pending {
            log::warn!("block {} went from completed back to pending", self.id);
        }
        self.status = block.status;

        if !Arc::ptr_eq(&self.source, &block.node) {
            let slicer = Slicer::new(plugins).with_chunks(fade.then_some(&self.ledger));
            self.source = Arc::clone(&block.node);
            self.total = slicer.count(&self.source);
            if self.phase != Phase::Queued {
                // Re-cut against the new node; keep subtrees that did not change.
                self.display = slicer.append(
                    self.display.as_ref(),
                    &self.source,
                    self.revealed,
                    self.revealed,
                    MergeMode::Verified,
                );
            }
        }

        if was_held && self.status == BlockStatus::Completed {
            self.reveal_all(&Slicer::new(plugins));
        }
    }

    /// Shows the whole current node, keeping subtree identity where possible.
    fn reveal_all(&mut self, slicer: &Slicer<'_>) {
        if self.phase == Phase::Queued {
            self.phase = Phase::Revealing;
        }
        let end = self.total.max(self.revealed);
        self.display = slicer.append(
            self.display.as_ref(),
            &self.source,
            self.revealed,
            end,
            MergeMode::Verified,
        );
        self.revealed = end;
        self.ledger.clear();
    }

    /// Moves a finished block to `DisplayComplete`. Returns whether it moved.
    fn settle(&mut self) -> bool {
        let done = self.phase == Phase::Revealing
            && self.is_fully_revealed()
            && self.status == BlockStatus::Completed;
        if done {
            log::debug!("block {} display complete", self.id);
            self.phase = Phase::DisplayComplete;
        }
        done
    }

    fn to_display(&self) -> DisplayBlock {
        DisplayBlock {
            id: self.id.clone(),
            display_node: self.display.clone(),
            is_display_complete: self.phase == Phase::DisplayComplete,
        }
    }
}

/// Paces the reveal of parser blocks and reports the display list.
///
/// ```rust
/// # use markdown_typewriter_engine::{
/// #     AstNode, BlockTransformer, CharsPerTick, SourceBlock, TransformerOptions,
/// # };
/// let options = TransformerOptions {
///     chars_per_tick: CharsPerTick::Fixed(5),
///     ..Default::default()
/// };
/// let mut transformer = BlockTransformer::new(options).unwrap();
/// transformer.push(&[SourceBlock::completed(
///     "0",
///     AstNode::paragraph(vec![AstNode::text("Hello World")]),
/// )]);
///
/// transformer.tick();
/// let shown = transformer.display_blocks();
/// assert_eq!(shown[0].display_node.as_ref().unwrap().plain_text(), "Hello");
/// ```
pub struct BlockTransformer {
    options: TransformerOptions,
    entries: Vec<BlockEntry>,
    scheduler: Scheduler,
    paused: bool,
    hidden: bool,
    destroyed: bool,
    all_complete_notified: bool,
    rng: StdRng,
    on_change: Option<ChangeListener>,
    on_all_complete: Option<CompleteListener>,
}

impl BlockTransformer {
    pub fn new(options: TransformerOptions) -> Result<Self, OptionsError> {
        options.validate()?;
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self {
            scheduler: Scheduler::new(options.tick_interval),
            options,
            entries: Vec::new(),
            paused: false,
            hidden: false,
            destroyed: false,
            all_complete_notified: false,
            rng,
            on_change: None,
            on_all_complete: None,
        })
    }

    /// Called with the full display list after every change.
    pub fn on_change(mut self, listener: impl FnMut(&[DisplayBlock]) + Send + 'static) -> Self {
        self.on_change = Some(Box::new(listener));
        self
    }

    /// Called once each time every block becomes display-complete.
    pub fn on_all_complete(mut self, listener: impl FnMut() + Send + 'static) -> Self {
        self.on_all_complete = Some(Box::new(listener));
        self
    }

    pub fn options(&self) -> &TransformerOptions {
        &self.options
    }

    /// Replaces the block list with the latest parser snapshot.
    ///
    /// Known ids keep their reveal progress, new ids are queued at the end of
    /// their position, ids missing from `blocks` are dropped.
    pub fn push(&mut self, blocks: &[SourceBlock]) {
        if self.destroyed {
            return;
        }
        let slicer = Slicer::new(&self.options.plugins);
        let fade = self.options.effect == AnimationEffect::FadeIn;
        let mut previous: HashMap<BlockId, BlockEntry> = self
            .entries
            .drain(..)
            .map(|entry| (entry.id.clone(), entry))
            .collect();
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(blocks.len());

        for block in blocks {
            if !seen.insert(&block.id) {
                log::warn!("duplicate block id {} in push; keeping the first", block.id);
                continue;
            }
            let entry = match previous.remove(&block.id) {
                Some(mut entry) => {
                    entry.update(block, &self.options.plugins, fade);
                    entry
                }
                None => BlockEntry::new(block, &slicer),
            };
            entries.push(entry);
        }
        for id in previous.keys() {
            log::debug!("block {id} removed");
        }
        self.entries = entries;

        if self.options.effect == AnimationEffect::None {
            for entry in &mut self.entries {
                entry.reveal_all(&slicer);
            }
        }
        for entry in &mut self.entries {
            entry.settle();
        }

        self.emit();
        self.after_change(Instant::now());
    }

    /// Advances the current block by one step, even while paused.
    ///
    /// Returns whether the display list changed.
    pub fn tick(&mut self) -> bool {
        self.step(Instant::now())
    }

    /// Runs a tick if one is due at `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.destroyed || self.is_paused_state() || !self.scheduler.is_due(now) {
            return false;
        }
        self.scheduler.reschedule(now);
        self.step(now)
    }

    /// When the next tick is due, if the transformer is running.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.destroyed || self.is_paused_state() {
            None
        } else {
            self.scheduler.deadline()
        }
    }

    fn step(&mut self, now: Instant) -> bool {
        if self.destroyed {
            return false;
        }
        let Some(index) = self.current_index().filter(|&i| !self.entries[i].is_held()) else {
            self.scheduler.disarm();
            return false;
        };

        let chars = self.options.chars_per_tick.sample(&mut self.rng);
        let fade = (self.options.effect == AnimationEffect::FadeIn)
            .then_some(self.options.fade_duration);
        let plugins = &self.options.plugins;
        let entry = &mut self.entries[index];

        let mut changed = false;
        if entry.phase == Phase::Queued {
            log::debug!("block {} revealing ({} units)", entry.id, entry.total);
            entry.phase = Phase::Revealing;
            changed = true;
        }

        if !entry.is_fully_revealed() {
            let start = entry.revealed;
            let end = (start + chars).min(entry.total);
            if let Some(max_age) = fade {
                entry.ledger.expire(now, max_age);
                entry.ledger.record(start, end, now);
            }
            let ledger = fade.map(|_| &entry.ledger);
            entry.display = Slicer::new(plugins).with_chunks(ledger).append(
                entry.display.as_ref(),
                &entry.source,
                start,
                end,
                MergeMode::Trusting,
            );
            entry.revealed = end;
            changed = true;
        }
        changed |= entry.settle();

        if changed {
            self.emit();
        }
        self.after_change(now);
        changed
    }

    /// Reveals everything known so far. Pending blocks stay held at full reveal.
    pub fn skip(&mut self) {
        if self.destroyed {
            return;
        }
        let slicer = Slicer::new(&self.options.plugins);
        let mut changed = false;
        for entry in &mut self.entries {
            let before = (entry.phase, entry.revealed);
            if entry.phase == Phase::DisplayComplete {
                continue;
            }
            entry.reveal_all(&slicer);
            entry.settle();
            changed |= before != (entry.phase, entry.revealed);
        }
        self.scheduler.disarm();
        if changed {
            log::debug!("skipped to end of {} blocks", self.entries.len());
            self.emit();
        }
        self.after_change(Instant::now());
    }

    pub fn pause(&mut self) {
        if !self.paused {
            log::debug!("paused");
        }
        self.paused = true;
        self.scheduler.disarm();
    }

    pub fn resume(&mut self) {
        if self.paused {
            log::debug!("resumed");
        }
        self.paused = false;
        self.after_change(Instant::now());
    }

    /// Host visibility; only pauses when `pause_on_hidden` is set.
    ///
    /// An explicit [`pause`](Self::pause) is not lifted by becoming visible.
    pub fn set_visibility(&mut self, visible: bool) {
        let hidden = !visible && self.options.pause_on_hidden;
        if hidden == self.hidden {
            return;
        }
        log::debug!("host {}", if visible { "visible" } else { "hidden" });
        self.hidden = hidden;
        if hidden {
            self.scheduler.disarm();
        } else {
            self.after_change(Instant::now());
        }
    }

    /// Drops every block and the reveal cursor.
    pub fn reset(&mut self) {
        if self.destroyed {
            return;
        }
        self.entries.clear();
        self.scheduler.disarm();
        self.all_complete_notified = false;
        self.emit();
    }

    /// Stops the transformer for good. No listener fires afterwards.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.entries.clear();
        self.scheduler.disarm();
        self.on_change = None;
        self.on_all_complete = None;
    }

    /// Applies `patch` from the next tick on. Nothing changes if it is invalid.
    pub fn set_options(&mut self, patch: OptionsPatch) -> Result<(), OptionsError> {
        if let Err(err) = patch.validate() {
            log::warn!("rejected transformer options: {err}");
            return Err(err);
        }
        if self.destroyed {
            return Ok(());
        }

        if let Some(chars) = patch.chars_per_tick {
            self.options.chars_per_tick = chars;
        }
        if let Some(interval) = patch.tick_interval {
            self.options.tick_interval = interval;
            self.scheduler.set_interval(interval);
        }
        if let Some(fade) = patch.fade_duration {
            self.options.fade_duration = fade;
        }
        if let Some(pause_on_hidden) = patch.pause_on_hidden {
            self.options.pause_on_hidden = pause_on_hidden;
            if !pause_on_hidden && self.hidden {
                self.hidden = false;
            }
        }
        if let Some(plugins) = patch.plugins {
            self.options.plugins = plugins;
            self.remeasure();
        }
        if let Some(effect) = patch.effect {
            self.options.effect = effect;
            if effect != AnimationEffect::FadeIn {
                for entry in &mut self.entries {
                    entry.ledger.clear();
                }
            }
            if effect == AnimationEffect::None {
                self.skip();
            }
        }
        self.after_change(Instant::now());
        Ok(())
    }

    /// Recounts every block under the current plugins.
    ///
    /// The revealed count moves up to cover whatever is already on screen, so
    /// a block never shows less than before.
    fn remeasure(&mut self) {
        let slicer = Slicer::new(&self.options.plugins);
        for entry in &mut self.entries {
            entry.total = slicer.count(&entry.source);
            entry.ledger.clear();
            if entry.phase != Phase::Queued {
                let shown = entry.display.as_deref().map_or(0, |d| slicer.count(d));
                entry.revealed = entry.revealed.max(shown);
                entry.display = slicer.slice(&entry.source, entry.revealed, 0);
            }
        }
    }

    /// Blocks that have started revealing, in document order.
    pub fn display_blocks(&self) -> Vec<DisplayBlock> {
        self.entries
            .iter()
            .filter(|e| e.phase != Phase::Queued)
            .map(BlockEntry::to_display)
            .collect()
    }

    /// Whether the next tick has something to do.
    ///
    /// False while the current block is held waiting for the parser.
    pub fn is_processing(&self) -> bool {
        self.current_index()
            .is_some_and(|i| !self.entries[i].is_held())
    }

    /// First block not yet display-complete; later blocks wait behind it.
    fn current_index(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.phase != Phase::DisplayComplete)
    }

    pub fn is_paused_state(&self) -> bool {
        self.paused || self.hidden
    }

    /// The current block, once it has started revealing. A held block stays
    /// current until the parser completes it.
    pub fn current_block_id(&self) -> Option<&BlockId> {
        self.current_index()
            .map(|i| &self.entries[i])
            .filter(|e| e.phase == Phase::Revealing)
            .map(|e| &e.id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Arms or disarms the clock and fires the completion listener.
    fn after_change(&mut self, now: Instant) {
        if self.destroyed {
            return;
        }
        if self.is_processing() {
            self.all_complete_notified = false;
            if !self.is_paused_state() {
                self.scheduler.arm(now);
            }
            return;
        }

        self.scheduler.disarm();
        let all_complete = !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|e| e.phase == Phase::DisplayComplete);
        if all_complete && !self.all_complete_notified {
            self.all_complete_notified = true;
            log::debug!("all {} blocks display complete", self.entries.len());
            if let Some(listener) = self.on_all_complete.as_mut()
                && catch_unwind(AssertUnwindSafe(|| listener())).is_err()
            {
                log::error!("all-complete listener panicked");
            }
        }
    }

    fn emit(&mut self) {
        if self.on_change.is_none() {
            return;
        }
        let blocks = self.display_blocks();
        if let Some(listener) = self.on_change.as_mut()
            && catch_unwind(AssertUnwindSafe(|| listener(&blocks))).is_err()
        {
            log::error!("change listener panicked while handling {} blocks", blocks.len());
        }
    }
}

impl std::fmt::Debug for BlockTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockTransformer")
            .field("options", &self.options)
            .field("entries", &self.entries)
            .field("paused", &self.paused)
            .field("hidden", &self.hidden)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}
