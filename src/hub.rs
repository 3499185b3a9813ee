//! In-process pub/sub for push delivery.
//!
//! Topics are per user (`user:{id}`), per room (`room:{id}`) and one shared
//! `admins` topic. Delivery is best-effort: publishing to a topic nobody is
//! subscribed to drops the event.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::events::Envelope;

pub const ADMINS: &str = "admins";

pub fn user_topic(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn room_topic(room_id: Uuid) -> String {
    format!("room:{room_id}")
}

#[derive(Clone)]
pub struct StreamHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Envelope>>>>,
    capacity: usize,
}

impl StreamHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Returns how many subscribers the event reached.
    pub async fn publish(&self, topic: &str, envelope: Envelope) -> usize {
        let channels = self.channels.read().await;
        match channels.get(topic) {
            Some(tx) => tx.send(envelope).unwrap_or(0),
            None => 0,
        }
    }

    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope> {
        let mut channels = self.channels.write().await;
        channels
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drops channels nobody listens to anymore.
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    pub async fn topic_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Runs [`StreamHub::cleanup`] when dropped. Held by streaming responses
    /// whose end isn't otherwise observed.
    pub fn cleanup_guard(&self) -> CleanupGuard {
        CleanupGuard(self.clone())
    }
}

pub struct CleanupGuard(StreamHub);

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let hub = self.0.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { hub.cleanup().await });
        }
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new(256)
    }
}
