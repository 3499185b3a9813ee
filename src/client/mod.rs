//! Client side of the push channels: self-healing subscriptions to the
//! notification and room streams, message sending with an HTTP fallback,
//! and typing-indicator bookkeeping.

pub mod backoff;
pub mod outbox;
pub mod reconnect;
pub mod socket;
pub mod sse;
pub mod typing;

use std::time::Duration;

use uuid::Uuid;

pub use backoff::{Backoff, RetryPolicy};
pub use outbox::{send_with_fallback, Delivery, HttpSink, MessageSink, Outgoing, SocketSink};
pub use reconnect::{ConnectionState, Subscription};
pub use typing::TypingTracker;

/// Notifications must eventually arrive, so the user channel never gives up.
pub const NOTIFICATION_RETRY: RetryPolicy = RetryPolicy::unbounded();
pub const ROOM_RETRY: RetryPolicy = RetryPolicy::bounded(5);
/// Servers heartbeat every 25s by default; two missed beats is a dead connection.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
pub const SOCKET_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, token)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http, base_url, token: token.into() }
    }

    fn stream_url(&self, path: &str) -> String {
        format!("{}{path}?token={}", self.base_url, self.token)
    }

    pub fn notifications(&self) -> Subscription {
        let url = self.stream_url("/notifications/events");
        reconnect::spawn(sse::SseConnector::new(self.http.clone(), url), NOTIFICATION_RETRY, Some(HEARTBEAT_TIMEOUT))
    }

    pub fn room(&self, room_id: Uuid) -> Subscription {
        let url = self.stream_url(&format!("/rooms/{room_id}/events"));
        reconnect::spawn(sse::SseConnector::new(self.http.clone(), url), ROOM_RETRY, Some(HEARTBEAT_TIMEOUT))
    }

    /// Joins the room over a WebSocket. Messages sent through the returned
    /// sink only count as delivered once written to the live socket, so pair
    /// it with [`ChatClient::http_sink`] in [`send_with_fallback`].
    pub fn room_socket(&self, room_id: Uuid) -> (Subscription, SocketSink) {
        let url = socket::ws_url(&self.stream_url(&format!("/rooms/{room_id}/ws")));
        let (sink, outbox) = SocketSink::channel(16, SOCKET_ACK_TIMEOUT);
        let subscription = reconnect::spawn(socket::SocketConnector::new(url, outbox), ROOM_RETRY, Some(HEARTBEAT_TIMEOUT));
        (subscription, sink)
    }

    pub fn http_sink(&self) -> HttpSink {
        HttpSink {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
        }
    }
}
