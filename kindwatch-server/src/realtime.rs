use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kindwatch_shared::api::RealtimeEvent;
use tokio::sync::broadcast;

const TOPIC_CAPACITY: usize = 16;

/// Topic-addressed publish/subscribe fan-out over `tokio::sync::broadcast`.
///
/// Publishing never blocks and never waits for delivery; a publish with zero
/// subscribers is a no-op, since the waiting client may already be gone.
/// Topics are created lazily on subscribe and pruned once the last receiver
/// is dropped.
#[derive(Clone, Default)]
pub struct RealtimeChannel {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<RealtimeEvent>>>>,
}

impl RealtimeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<RealtimeEvent> {
        let mut map = self.topics.lock().expect("realtime topics poisoned");
        // Sweep entries whose receivers are all gone. Most topics see exactly
        // one terminal event and the subscriber leaves afterwards, so without
        // this the map grows for the life of the process.
        map.retain(|_, tx| tx.receiver_count() > 0);
        map.entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Deliver `event` to all current subscribers of `topic`.
    /// Returns how many receivers got it; zero is not an error.
    pub fn publish(&self, topic: &str, event: RealtimeEvent) -> usize {
        let mut map = self.topics.lock().expect("realtime topics poisoned");
        let Some(tx) = map.get(topic) else {
            tracing::debug!(topic, "publish: no subscribers for topic");
            return 0;
        };
        let delivered = tx.send(event).unwrap_or(0);
        if tx.receiver_count() == 0 {
            map.remove(topic);
        }
        delivered
    }

    #[cfg(test)]
    fn topic_count(&self) -> usize {
        self.topics.lock().unwrap().len()
    }
}
