//! Turns roster and duty events into notifications.
//!
//! Joins are queued on the [`JoinBatcher`](crate::batcher::JoinBatcher);
//! leaves and duty pops are formatted and routed straight away, each subject
//! to the [`AfkGate`].

use std::sync::Arc;

use crate::batcher::JoinQueue;
use crate::config::SharedSettings;
use crate::delivery::NotificationSink;
use crate::logging;
use crate::messages;
use crate::presence::AfkGate;
use crate::roster::{ChangeEvent, RosterMember, Subject, SubscriptionId};

#[derive(Clone)]
pub struct PartyNotifier {
    joins: JoinQueue,
    gate: AfkGate,
    sink: Arc<dyn NotificationSink>,
    settings: SharedSettings,
}

impl PartyNotifier {
    pub fn new(
        joins: JoinQueue,
        gate: AfkGate,
        sink: Arc<dyn NotificationSink>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            joins,
            gate,
            sink,
            settings,
        }
    }

    /// Subscribe to `events`. Keep the returned attachment and call
    /// [`Attachment::detach`] on teardown.
    pub fn attach(&self, events: &Subject) -> Attachment {
        let notifier = self.clone();
        let id = events.subscribe(move |event: &ChangeEvent| notifier.on_change(event));
        crate::plog!("notifier: attached to roster events");
        Attachment {
            events: events.clone(),
            id,
        }
    }

    pub fn on_change(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::Join(member) => self.on_join(member),
            ChangeEvent::Leave(member) => self.on_leave(member),
        }
    }

    fn on_join(&self, member: &RosterMember) {
        if !self.joins.push(member.clone()) {
            crate::plog!(
                "notifier: batcher is stopped; dropping join of {}",
                logging::member(&member.name)
            );
        }
    }

    fn on_leave(&self, member: &RosterMember) {
        if !self.gate.allows() {
            crate::plog!(
                "notifier: client is not AFK; no leave notification for {}",
                logging::member(&member.name)
            );
            return;
        }
        self.sink.route(messages::leave(member));
    }

    /// The duty finder popped. `None` for roulettes.
    pub fn on_duty_pop(&self, duty_name: Option<&str>) {
        if !self.settings.snapshot().enable_for_duty_pops {
            crate::plog!("notifier: duty pop notifications are disabled");
            return;
        }
        if !self.gate.allows() {
            crate::plog!("notifier: client is not AFK; no duty pop notification");
            return;
        }
        self.sink.route(messages::duty_pop(duty_name));
    }
}

/// A live subscription of a [`PartyNotifier`] to a roster [`Subject`].
pub struct Attachment {
    events: Subject,
    id: SubscriptionId,
}

impl Attachment {
    pub fn detach(self) {
        if self.events.unsubscribe(self.id) {
            crate::plog!("notifier: detached from roster events");
        }
    }
}
