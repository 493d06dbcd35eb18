use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use partyrelay::batcher::JoinBatcher;
use partyrelay::config::{Settings, SharedSettings};
use partyrelay::delivery::{DeliveryMessage, NotificationSink};
use partyrelay::presence::{AfkGate, PresenceError};
use partyrelay::roster::RosterMember;

const WINDOW: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<DeliveryMessage>>,
}

impl RecordingSink {
    fn messages(&self) -> Vec<DeliveryMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn route(&self, message: DeliveryMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

/// Gate driven by a presence code the test can flip.
fn gate(code: Arc<AtomicU16>) -> AfkGate {
    let settings = SharedSettings::new(Settings::default());
    AfkGate::new(
        settings,
        Arc::new(move || Ok::<u16, PresenceError>(code.load(Ordering::SeqCst))),
    )
}

fn member(name: &str, group_size: u32) -> RosterMember {
    RosterMember {
        name: name.to_string(),
        group_size,
        level: 100,
        job_id: 24,
    }
}

#[tokio::test(start_paused = true)]
async fn burst_of_joins_becomes_one_message() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = JoinBatcher::spawn(WINDOW, gate(Arc::new(AtomicU16::new(17))), sink.clone());
    let queue = batcher.queue();

    for (i, name) in ["Alice", "Bob", "Cid"].iter().enumerate() {
        assert!(queue.push(member(name, i as u32 + 2)));
    }

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(sink.messages().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].title, "4/8: Party join");
    assert_eq!(
        messages[0].body,
        "The following members have joined the party:\n\
         • **Alice** (Lv100 **WHM**)\n\
         • **Bob** (Lv100 **WHM**)\n\
         • **Cid** (Lv100 **WHM**)"
    );

    batcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn later_joins_do_not_extend_the_window() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = JoinBatcher::spawn(WINDOW, gate(Arc::new(AtomicU16::new(18))), sink.clone());
    let queue = batcher.queue();

    queue.push(member("Alice", 2));
    tokio::time::sleep(Duration::from_secs(3)).await;
    queue.push(member("Bob", 3));
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].body.contains("Alice"));
    assert!(messages[0].body.contains("Bob"));

    batcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn join_after_a_flush_opens_a_new_window() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = JoinBatcher::spawn(WINDOW, gate(Arc::new(AtomicU16::new(17))), sink.clone());
    let queue = batcher.queue();

    queue.push(member("Alice", 2));
    tokio::time::sleep(Duration::from_secs(6)).await;
    queue.push(member("Bob", 3));
    tokio::time::sleep(Duration::from_secs(6)).await;

    let messages = sink.messages();
    assert_eq!(messages.len(), 2);
    assert!(!messages[1].body.contains("Alice"));
    assert_eq!(messages[1].title, "3/8: Party join");

    batcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn closed_gate_discards_the_batch() {
    let presence = Arc::new(AtomicU16::new(0));
    let sink = Arc::new(RecordingSink::default());
    let batcher = JoinBatcher::spawn(WINDOW, gate(Arc::clone(&presence)), sink.clone());
    let queue = batcher.queue();

    queue.push(member("Alice", 2));
    queue.push(member("Bob", 3));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(sink.messages().is_empty());

    // Nothing is retried once the player goes AFK...
    presence.store(17, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(sink.messages().is_empty());

    // ...but the next join arms a fresh window.
    queue.push(member("Cid", 4));
    tokio::time::sleep(Duration::from_secs(6)).await;
    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].body.contains("Cid"));
    assert!(!messages[0].body.contains("Alice"));

    batcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn full_party_batch_is_titled_party_full() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = JoinBatcher::spawn(WINDOW, gate(Arc::new(AtomicU16::new(17))), sink.clone());
    batcher.queue().push(member("Hana", 8));
    tokio::time::sleep(Duration::from_secs(6)).await;

    let messages = sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].title, "Party full");

    batcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stopping_cancels_the_pending_flush() {
    let sink = Arc::new(RecordingSink::default());
    let batcher = JoinBatcher::spawn(WINDOW, gate(Arc::new(AtomicU16::new(17))), sink.clone());
    let queue = batcher.queue();

    queue.push(member("Alice", 2));
    tokio::time::sleep(Duration::from_secs(1)).await;
    batcher.stop().await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(sink.messages().is_empty());
    assert!(!queue.push(member("Bob", 3)));
}
