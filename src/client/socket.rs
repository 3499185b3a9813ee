use std::sync::Arc;

use anyhow::Context;
use futures_util::{future, SinkExt, StreamExt};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::Message;

use crate::events::Envelope;

use super::{
    outbox::Outgoing,
    reconnect::{Connect, EnvelopeStream},
};

/// `http://` to `ws://`, `https://` to `wss://`.
pub fn ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_owned()
    }
}

/// Opens the bidirectional room socket. Each connection gets a writer task
/// that drains the shared outbox until the socket goes away.
pub struct SocketConnector {
    url: String,
    outbox: Arc<Mutex<mpsc::Receiver<Outgoing>>>,
}

impl SocketConnector {
    pub fn new(url: String, outbox: mpsc::Receiver<Outgoing>) -> Self {
        Self { url, outbox: Arc::new(Mutex::new(outbox)) }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Connect for SocketConnector {
    async fn connect(&self) -> anyhow::Result<EnvelopeStream> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .context("room socket handshake failed")?;
        let (mut sink, stream) = socket.split();

        let outbox = self.outbox.clone();
        let writer = tokio::spawn(async move {
            // the previous connection's writer releases this when it is aborted
            let mut outbox = outbox.lock_owned().await;
            while let Some(outgoing) = outbox.recv().await {
                if outgoing.abandoned() {
                    continue;
                }
                let written = sink
                    .send(Message::text(outgoing.frame.clone()))
                    .await
                    .context("room socket write failed");
                let failed = written.is_err();
                outgoing.ack(written);
                if failed {
                    break;
                }
            }
        });
        let writer = AbortOnDrop(writer);

        let events = stream.filter_map(move |message| {
            let _writer = &writer;
            future::ready(match message {
                Ok(Message::Text(text)) => serde_json::from_str::<Envelope>(text.as_str()).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            })
        });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_urls_follow_the_http_scheme() {
        assert_eq!(ws_url("http://localhost:3000/rooms/1/ws?token=a"), "ws://localhost:3000/rooms/1/ws?token=a");
        assert_eq!(ws_url("https://pets.example/rooms/1/ws"), "wss://pets.example/rooms/1/ws");
    }
}
