//! Debounced batching of party joins.
//!
//! # State machine
//!
//! ```text
//!            join (arms timer)          timer fires
//!   Idle ───────────────────► Accumulating ─────────► Flushing
//!    ▲                          ▲     │ join             │
//!    │                          │     └──(no re-arm)     │
//!    │        joins arrived     │                        │
//!    │        during flush      └────────────────────────┤
//!    │                                                   │
//!    └────────────── nothing pending ────────────────────┘
//! ```
//!
//! [`BatchState`] is the synchronous core and owns the pending joins and the
//! phase tag. [`JoinBatcher`] runs it inside a single actor task: joins arrive
//! over a channel, and the debounce timer is the actor's one optional
//! deadline, so two flushes can never run at once and stopping the actor
//! cancels any pending flush.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::delivery::NotificationSink;
use crate::logging;
use crate::messages;
use crate::presence::AfkGate;
use crate::roster::RosterMember;

pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// Nothing pending, no timer armed.
    Idle,
    /// Joins pending, exactly one timer armed.
    Accumulating,
    /// A flush body is running.
    Flushing,
}

#[derive(Debug)]
pub struct BatchState {
    pending: Vec<RosterMember>,
    phase: BatchPhase,
    last_flush: Option<Instant>,
}

impl Default for BatchState {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchState {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            phase: BatchPhase::Idle,
            last_flush: None,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn pending(&self) -> &[RosterMember] {
        &self.pending
    }

    /// When the last batch was handed to the router.
    pub fn last_flush(&self) -> Option<Instant> {
        self.last_flush
    }

    /// Queue a join. Returns true when the caller must arm the debounce
    /// timer, which happens only on the transition out of `Idle`.
    pub fn push(&mut self, member: RosterMember) -> bool {
        self.pending.push(member);
        match self.phase {
            BatchPhase::Idle => {
                self.phase = BatchPhase::Accumulating;
                true
            }
            BatchPhase::Accumulating | BatchPhase::Flushing => false,
        }
    }

    /// Enter `Flushing` and take every queued join. With nothing queued the
    /// state returns to `Idle` and `None` is returned.
    pub fn begin_flush(&mut self) -> Option<Vec<RosterMember>> {
        if self.pending.is_empty() {
            self.phase = BatchPhase::Idle;
            return None;
        }
        self.phase = BatchPhase::Flushing;
        Some(std::mem::take(&mut self.pending))
    }

    /// Leave `Flushing`. Returns true when joins were queued during the
    /// flush, in which case the state is `Accumulating` again and the caller
    /// must arm a new timer.
    pub fn finish_flush(&mut self, delivered: bool, now: Instant) -> bool {
        if delivered {
            self.last_flush = Some(now);
        }
        if self.pending.is_empty() {
            self.phase = BatchPhase::Idle;
            false
        } else {
            self.phase = BatchPhase::Accumulating;
            true
        }
    }

    /// Drop everything and return to `Idle`; returns how many joins were
    /// dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.phase = BatchPhase::Idle;
        dropped
    }
}

enum BatchCommand {
    Join(RosterMember),
    Stop,
}

/// Cloneable sender half used by event handlers.
#[derive(Clone)]
pub struct JoinQueue {
    tx: mpsc::UnboundedSender<BatchCommand>,
}

impl JoinQueue {
    /// Returns false once the batcher has stopped.
    pub fn push(&self, member: RosterMember) -> bool {
        self.tx.send(BatchCommand::Join(member)).is_ok()
    }
}

pub struct JoinBatcher {
    tx: mpsc::UnboundedSender<BatchCommand>,
    task: JoinHandle<()>,
}

impl JoinBatcher {
    pub fn spawn(window: Duration, gate: AfkGate, sink: Arc<dyn NotificationSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = BatchActor {
            window,
            state: BatchState::new(),
            flush_at: None,
            gate,
            sink,
        };
        let task = tokio::spawn(actor.run(rx));
        Self { tx, task }
    }

    pub fn queue(&self) -> JoinQueue {
        JoinQueue {
            tx: self.tx.clone(),
        }
    }

    /// Stop the actor. Pending joins are dropped and no further flush fires.
    pub async fn stop(self) {
        let _ = self.tx.send(BatchCommand::Stop);
        let _ = self.task.await;
    }
}

struct BatchActor {
    window: Duration,
    state: BatchState,
    flush_at: Option<Instant>,
    gate: AfkGate,
    sink: Arc<dyn NotificationSink>,
}

impl BatchActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BatchCommand>) {
        loop {
            let deadline = self.flush_at;
            tokio::select! {
                command = rx.recv() => match command {
                    Some(BatchCommand::Join(member)) => self.on_join(member),
                    Some(BatchCommand::Stop) | None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_at = None;
                    self.flush();
                }
            }
        }

        let dropped = self.state.clear();
        if dropped > 0 {
            crate::plog!("batch: stopped with {} unsent join(s)", dropped);
        }
    }

    fn on_join(&mut self, member: RosterMember) {
        crate::plog!("batch: queued {}", logging::member(&member.name));
        if self.state.push(member) {
            self.arm();
        }
    }

    fn arm(&mut self) {
        debug_assert!(self.flush_at.is_none(), "flush timer already armed");
        self.flush_at = Some(Instant::now() + self.window);
    }

    fn flush(&mut self) {
        let Some(batch) = self.state.begin_flush() else {
            return;
        };

        let delivered = if !self.gate.allows() {
            crate::plog!("batch: client is not AFK; discarding {} join(s)", batch.len());
            false
        } else if let Some(message) = messages::join_batch(&batch) {
            crate::plog!("batch: flushing {} join(s) as '{}'", batch.len(), message.title);
            self.sink.route(message);
            true
        } else {
            false
        };

        if self.state.finish_flush(delivered, Instant::now()) {
            self.arm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> RosterMember {
        RosterMember {
            name: name.into(),
            group_size: 2,
            level: 90,
            job_id: 19,
        }
    }

    #[test]
    fn only_the_first_join_arms_the_timer() {
        let mut state = BatchState::new();
        assert!(state.push(member("a")));
        assert_eq!(state.phase(), BatchPhase::Accumulating);
        assert!(!state.push(member("b")));
        assert!(!state.push(member("c")));
        assert_eq!(state.pending().len(), 3);
    }

    #[test]
    fn flush_takes_everything_and_returns_to_idle() {
        let mut state = BatchState::new();
        state.push(member("a"));
        state.push(member("b"));

        let batch = state.begin_flush().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(state.phase(), BatchPhase::Flushing);

        let now = Instant::now();
        assert!(!state.finish_flush(true, now));
        assert_eq!(state.phase(), BatchPhase::Idle);
        assert!(state.pending().is_empty());
        assert_eq!(state.last_flush(), Some(now));
    }

    #[test]
    fn empty_flush_goes_idle() {
        let mut state = BatchState::new();
        assert!(state.begin_flush().is_none());
        assert_eq!(state.phase(), BatchPhase::Idle);
    }

    #[test]
    fn join_during_flush_is_kept_for_the_next_window() {
        let mut state = BatchState::new();
        state.push(member("a"));
        let first = state.begin_flush().unwrap();
        assert_eq!(first, vec![member("a")]);

        // Arrives while the flush body runs: no new timer yet.
        assert!(!state.push(member("b")));
        assert_eq!(state.phase(), BatchPhase::Flushing);

        // Finishing the flush asks for a re-arm and keeps "b" queued.
        assert!(state.finish_flush(true, Instant::now()));
        assert_eq!(state.phase(), BatchPhase::Accumulating);
        assert_eq!(state.pending(), &[member("b")]);

        let second = state.begin_flush().unwrap();
        assert_eq!(second, vec![member("b")]);
        assert!(!state.finish_flush(true, Instant::now()));
        assert_eq!(state.phase(), BatchPhase::Idle);
    }

    #[test]
    fn undelivered_flush_keeps_previous_flush_time() {
        let mut state = BatchState::new();
        state.push(member("a"));
        state.begin_flush();
        state.finish_flush(false, Instant::now());
        assert_eq!(state.last_flush(), None);
        assert_eq!(state.phase(), BatchPhase::Idle);
    }

    #[test]
    fn clear_drops_pending() {
        let mut state = BatchState::new();
        state.push(member("a"));
        assert_eq!(state.clear(), 1);
        assert_eq!(state.phase(), BatchPhase::Idle);
        assert!(state.push(member("b")));
    }
}
