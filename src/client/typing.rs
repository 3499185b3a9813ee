use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;
use uuid::Uuid;

use crate::events::{Envelope, EventKind};

pub const TYPING_WINDOW: Duration = Duration::from_secs(3);

/// Who is typing in a room, from `typing` and `message` events.
///
/// A user counts as typing until `window` passes without another indicator,
/// or until their message arrives.
#[derive(Debug)]
pub struct TypingTracker {
    window: Duration,
    last_seen: HashMap<Uuid, Instant>,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(TYPING_WINDOW)
    }
}

fn user_field(envelope: &Envelope, field: &str) -> Option<Uuid> {
    envelope.data.get(field)?.as_str()?.parse().ok()
}

impl TypingTracker {
    pub fn new(window: Duration) -> Self {
        Self { window, last_seen: HashMap::new() }
    }

    pub fn observe(&mut self, envelope: &Envelope) {
        match envelope.kind {
            EventKind::Typing => {
                if let Some(user_id) = user_field(envelope, "user_id") {
                    self.last_seen.insert(user_id, Instant::now());
                }
            }
            EventKind::Message => {
                if let Some(sender_id) = user_field(envelope, "sender_id") {
                    self.last_seen.remove(&sender_id);
                }
            }
            _ => {}
        }
    }

    pub fn active(&mut self) -> Vec<Uuid> {
        let window = self.window;
        self.last_seen.retain(|_, seen| seen.elapsed() < window);

        let mut typing: Vec<Uuid> = self.last_seen.keys().copied().collect();
        typing.sort();
        typing
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn typing(user_id: Uuid) -> Envelope {
        Envelope::new(EventKind::Typing, json!({ "user_id": user_id }))
    }

    #[tokio::test(start_paused = true)]
    async fn indicator_expires_after_the_window() {
        let user = Uuid::now_v7();
        let mut tracker = TypingTracker::default();

        tracker.observe(&typing(user));
        tokio::time::advance(Duration::from_millis(2_900)).await;
        assert_eq!(tracker.active(), vec![user]);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(tracker.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_typing_extends_the_window() {
        let user = Uuid::now_v7();
        let mut tracker = TypingTracker::default();

        tracker.observe(&typing(user));
        tokio::time::advance(Duration::from_secs(2)).await;
        tracker.observe(&typing(user));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(tracker.active(), vec![user]);
    }

    #[tokio::test(start_paused = true)]
    async fn message_clears_the_sender() {
        let (alice, bob) = (Uuid::now_v7(), Uuid::now_v7());
        let mut tracker = TypingTracker::default();

        tracker.observe(&typing(alice));
        tracker.observe(&typing(bob));
        tracker.observe(&Envelope::new(EventKind::Message, json!({ "sender_id": alice, "content": "hi" })));

        assert_eq!(tracker.active(), vec![bob]);
    }
}
