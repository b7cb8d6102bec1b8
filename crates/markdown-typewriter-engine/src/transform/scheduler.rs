use std::time::{Duration, Instant};

/// Deadline bookkeeping for the reveal loop.
///
/// The host owns the actual timer; it asks for [`deadline`](Self::deadline)
/// and calls back once it has passed.
#[derive(Debug, Clone)]
pub(crate) struct Scheduler {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Scheduler {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Starts the clock unless a tick is already scheduled.
    pub(crate) fn arm(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.deadline = None;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Schedules the tick after the one firing at `now`.
    pub(crate) fn reschedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// New interval; the pending deadline is kept.
    pub(crate) fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }
}
