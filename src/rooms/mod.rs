mod room;
mod msg;
mod ws;

use std::{collections::HashMap, sync::{Arc, Mutex}};

use axum::{routing::{get, post}, Router};
use uuid::Uuid;

use crate::AppState;

pub use msg::{history, mark_read, Message};
pub use room::{find_room, materialize, room_for_request, ChatRoom, Materialized};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::my_rooms))
        .route("/{uuid}", get(room::room))
        .route("/{uuid}/messages", get(msg::messages).post(msg::send_msg))
        .route("/{uuid}/messages/{message_id}/read", post(msg::read))
        .route("/{uuid}/ws", get(ws::room_ws))
        .route("/{uuid}/events", get(ws::room_events))
}

/// One async lock per room, held while a message is stored and published.
#[derive(Clone, Default)]
pub struct RoomSequencer {
    locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RoomSequencer {
    pub fn lock_for(&self, room_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(room_id).or_default().clone()
    }

    /// Forgets locks no sender is holding or waiting on.
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
