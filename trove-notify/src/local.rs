//! In-process fan-out bus.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::{Bus, BusMessage};

const CHANNEL_CAPACITY: usize = 256;

/// Per-topic broadcast channels in a shared map. Senders are created on
/// first use (publish or subscribe) and live for the process lifetime.
///
/// `LocalBus` is `Clone` and can be shared across workers.
#[derive(Clone, Default)]
pub struct LocalBus {
    topics: std::sync::Arc<DashMap<String, broadcast::Sender<BusMessage>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, topic: &str, message: BusMessage) {
        // No subscribers is fine; the send result is irrelevant.
        let _ = self.sender(topic).send(message);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        self.sender(topic).subscribe()
    }
}
