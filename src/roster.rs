//! Roster snapshots and membership change detection.
//!
//! A [`RosterWatcher`] polls a [`RosterSource`] on every tick, builds a fresh
//! [`Snapshot`], diffs it against the previous one by member name, and
//! publishes each resulting [`ChangeEvent`] to the subscribers of its
//! [`Subject`].
//!
//! The watcher's state is only touched by whoever owns it: either the caller
//! driving [`RosterWatcher::tick`] directly, or the poll task started with
//! [`RosterWatcher::start`], which hands the watcher back on stop. The poll
//! task moves the watcher onto the blocking pool for each tick, since a
//! source's `refresh` may do file IO.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::logging::{self, Cooldown};

pub const DEFAULT_POLL_TICK: Duration = Duration::from_millis(250);

/// Minimum spacing between repeated "skipping tick" diagnostics.
pub const STATUS_LOG_COOLDOWN: Duration = Duration::from_secs(30);

/// One row as reported by the host's party list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMember {
    pub name: String,
    pub level: u32,
    pub job_id: u32,
}

/// The host's view of the cross-world party list.
pub trait RosterSource: Send + Sync {
    /// Called once at the start of every tick, before any other method.
    fn refresh(&self) {}
    fn is_logged_in(&self) -> bool;
    fn is_in_trackable_party(&self) -> bool;
    fn member_count(&self) -> usize;
    fn member_at(&self, index: usize) -> Option<RawMember>;
}

/// A party member as captured by one poll.
///
/// `name` is the identity used for diffing; `group_size` is the number of
/// members in the snapshot that produced this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RosterMember {
    pub name: String,
    pub group_size: u32,
    pub level: u32,
    pub job_id: u32,
}

/// Point-in-time capture of the party. Names are unique within a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    members: Vec<RosterMember>,
}

impl Snapshot {
    /// Build a snapshot, keeping the first occurrence of each name.
    pub fn from_members(members: impl IntoIterator<Item = RosterMember>) -> Self {
        let mut seen = HashSet::new();
        let members = members
            .into_iter()
            .filter(|m| seen.insert(m.name.clone()))
            .collect();
        Self { members }
    }

    pub fn members(&self) -> &[RosterMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }

    fn names(&self) -> HashSet<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Join(RosterMember),
    Leave(RosterMember),
}

impl ChangeEvent {
    pub fn member(&self) -> &RosterMember {
        match self {
            ChangeEvent::Join(m) | ChangeEvent::Leave(m) => m,
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, ChangeEvent::Join(_))
    }
}

/// Membership difference between two snapshots.
///
/// Joins come first, in `next` order, followed by leaves in `prev` order.
/// Members present in both produce nothing, whatever their position.
pub fn diff(prev: &Snapshot, next: &Snapshot) -> Vec<ChangeEvent> {
    let prev_names = prev.names();
    let next_names = next.names();

    let joins = next
        .members
        .iter()
        .filter(|m| !prev_names.contains(m.name.as_str()))
        .cloned()
        .map(ChangeEvent::Join);
    let leaves = prev
        .members
        .iter()
        .filter(|m| !next_names.contains(m.name.as_str()))
        .cloned()
        .map(ChangeEvent::Leave);

    joins.chain(leaves).collect()
}

// ---------------------------------------------------------------------------
// Publish / subscribe
// ---------------------------------------------------------------------------

pub trait ChangeSubscriber: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> ChangeSubscriber for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Cloneable fan-out point for change events.
#[derive(Clone, Default)]
pub struct Subject {
    inner: Arc<Mutex<SubjectInner>>,
}

#[derive(Default)]
struct SubjectInner {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Arc<dyn ChangeSubscriber>)>,
}

impl Subject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<S>(&self, subscriber: S) -> SubscriptionId
    where
        S: ChangeSubscriber + 'static,
    {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.subscribers.push((id, Arc::new(subscriber)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// Subscribers are called outside the lock, so a callback may
    /// subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, event: &ChangeEvent) {
        let subscribers: Vec<_> = self
            .lock()
            .subscribers
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();
        for subscriber in subscribers {
            subscriber.on_change(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubjectInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NotLoggedIn,
    NotInParty,
    Polled(Vec<ChangeEvent>),
}

pub struct RosterWatcher {
    source: Arc<dyn RosterSource>,
    previous: Snapshot,
    events: Subject,
    logged_out_log: Cooldown,
    no_party_log: Cooldown,
}

impl RosterWatcher {
    pub fn new(source: Arc<dyn RosterSource>) -> Self {
        Self {
            source,
            previous: Snapshot::default(),
            events: Subject::new(),
            logged_out_log: Cooldown::new(STATUS_LOG_COOLDOWN),
            no_party_log: Cooldown::new(STATUS_LOG_COOLDOWN),
        }
    }

    /// Handle for subscribing to this watcher's change events.
    pub fn events(&self) -> Subject {
        self.events.clone()
    }

    pub fn previous(&self) -> &Snapshot {
        &self.previous
    }

    /// Run one poll: capture, diff, publish, then replace the previous
    /// snapshot.
    pub fn tick(&mut self) -> TickOutcome {
        self.source.refresh();
        if !self.source.is_logged_in() {
            if self.logged_out_log.ready() {
                crate::plog!("roster: client is not logged in; skipping update");
            }
            return TickOutcome::NotLoggedIn;
        }
        self.logged_out_log.reset();

        if !self.source.is_in_trackable_party() {
            if self.no_party_log.ready() {
                crate::plog!("roster: not in a cross-world party; skipping update");
            }
            return TickOutcome::NotInParty;
        }
        self.no_party_log.reset();

        let next = self.capture();
        let changes = diff(&self.previous, &next);
        for change in &changes {
            match change {
                ChangeEvent::Join(m) => crate::plog!(
                    "roster: {} joined ({} member(s))",
                    logging::member(&m.name),
                    next.len()
                ),
                ChangeEvent::Leave(m) => crate::plog!(
                    "roster: {} left ({} member(s))",
                    logging::member(&m.name),
                    next.len()
                ),
            }
            self.events.publish(change);
        }
        self.previous = next;
        TickOutcome::Polled(changes)
    }

    fn capture(&self) -> Snapshot {
        let count = self.source.member_count();
        let rows: Vec<RawMember> = (0..count)
            .filter_map(|i| self.source.member_at(i))
            .filter(|row| !row.name.trim().is_empty())
            .collect();
        let group_size = u32::try_from(rows.len()).unwrap_or(u32::MAX);

        let snapshot = Snapshot::from_members(rows.into_iter().map(|row| RosterMember {
            name: row.name,
            group_size,
            level: row.level,
            job_id: row.job_id,
        }));
        if snapshot.len() as u32 != group_size {
            crate::plog!(
                "roster: dropped {} duplicate name(s) from party list",
                group_size as usize - snapshot.len()
            );
        }
        snapshot
    }

    /// Move the watcher onto a poll task ticking every `period`.
    pub fn start(mut self, period: Duration) -> WatcherTask {
        let events = self.events();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        crate::plog!("roster: watcher started ({}ms tick)", period.as_millis());

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        // Sources may read files, so the tick runs off the runtime threads.
                        let ticked = tokio::task::spawn_blocking(move || {
                            self.tick();
                            self
                        })
                        .await;
                        match ticked {
                            Ok(watcher) => self = watcher,
                            Err(e) => {
                                crate::plog!("roster: tick failed: {}", e);
                                return None;
                            }
                        }
                    }
                }
            }
            crate::plog!("roster: watcher stopped");
            Some(self)
        });

        WatcherTask {
            stop_tx,
            handle,
            events,
        }
    }
}

/// A running poll loop. Dropping it without calling [`stop`](Self::stop)
/// also ends the loop.
pub struct WatcherTask {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<Option<RosterWatcher>>,
    events: Subject,
}

impl WatcherTask {
    pub fn events(&self) -> Subject {
        self.events.clone()
    }

    /// Stop polling and wait for the loop to exit. Returns the watcher with
    /// its last snapshot, or `None` if a tick panicked.
    pub async fn stop(self) -> Option<RosterWatcher> {
        let _ = self.stop_tx.send(());
        self.handle.await.ok().flatten()
    }
}
