use std::{future::Future, time::Duration};

use anyhow::Context;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub trait MessageSink: Send + Sync {
    fn send(&self, room_id: Uuid, content: &str) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Realtime,
    Fallback,
}

/// Sends over the realtime path, resending through `fallback` when that fails.
pub async fn send_with_fallback<R, F>(realtime: &R, fallback: &F, room_id: Uuid, content: &str) -> anyhow::Result<Delivery>
where
    R: MessageSink,
    F: MessageSink,
{
    match realtime.send(room_id, content).await {
        Ok(()) => Ok(Delivery::Realtime),
        Err(e) => {
            tracing::warn!(%room_id, error = %e, "realtime send failed, using fallback");
            fallback
                .send(room_id, content)
                .await
                .context("message not delivered")?;
            Ok(Delivery::Fallback)
        }
    }
}

/// `POST /rooms/{id}/messages`.
#[derive(Clone)]
pub struct HttpSink {
    pub(super) http: reqwest::Client,
    pub(super) base_url: String,
    pub(super) token: String,
}

impl MessageSink for HttpSink {
    async fn send(&self, room_id: Uuid, content: &str) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/rooms/{room_id}/messages", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({ "content": content }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// A frame waiting for the room socket writer, with the channel that reports
/// whether it was written.
#[derive(Debug)]
pub struct Outgoing {
    pub frame: String,
    ack: oneshot::Sender<anyhow::Result<()>>,
}

impl Outgoing {
    /// The sender stopped waiting; writing now would duplicate its fallback send.
    pub fn abandoned(&self) -> bool {
        self.ack.is_closed()
    }

    pub fn ack(self, result: anyhow::Result<()>) {
        let _ = self.ack.send(result);
    }
}

/// Sends `message` frames through the room socket writer. A send only counts
/// once the writer confirms the frame went out on the socket.
#[derive(Clone)]
pub struct SocketSink {
    frames: mpsc::Sender<Outgoing>,
    ack_timeout: Duration,
}

impl SocketSink {
    pub fn channel(capacity: usize, ack_timeout: Duration) -> (SocketSink, mpsc::Receiver<Outgoing>) {
        let (frames, outbox) = mpsc::channel(capacity);
        (SocketSink { frames, ack_timeout }, outbox)
    }
}

impl MessageSink for SocketSink {
    async fn send(&self, _room_id: Uuid, content: &str) -> anyhow::Result<()> {
        let frame = json!({ "type": "message", "data": { "content": content } }).to_string();
        let (ack, written) = oneshot::channel();

        let delivery = async {
            self.frames
                .send(Outgoing { frame, ack })
                .await
                .map_err(|_| anyhow::anyhow!("room socket closed"))?;
            written.await.map_err(|_| anyhow::anyhow!("room socket dropped the message"))?
        };

        tokio::time::timeout(self.ack_timeout, delivery)
            .await
            .map_err(|_| anyhow::anyhow!("room socket did not confirm the write"))?
    }
}
