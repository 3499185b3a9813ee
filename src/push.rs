//! Shared plumbing for the WebSocket and SSE push endpoints.

use std::{convert::Infallible, pin::Pin, time::Duration};

use axum::{
    extract::ws::{Message, WebSocket},
    response::sse::{Event, Sse},
};
use futures_util::{stream::SplitSink, SinkExt, Stream};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, IntervalStream},
    StreamExt,
};
use uuid::Uuid;

use crate::{events::{Envelope, EventKind}, hub::StreamHub, AppError};

pub(crate) type Feed = Pin<Box<dyn Stream<Item = Result<Envelope, BroadcastStreamRecvError>> + Send>>;

pub(crate) fn feed(rx: broadcast::Receiver<Envelope>) -> Feed {
    Box::pin(BroadcastStream::new(rx))
}

pub(crate) fn merge(a: Feed, b: Feed) -> Feed {
    Box::pin(a.merge(b))
}

/// Typing indicators go to everyone in the room except the typist.
pub(crate) fn visible_to(envelope: &Envelope, viewer: Uuid) -> bool {
    !(envelope.kind == EventKind::Typing && envelope.data["user_id"] == viewer.to_string())
}

fn lagged(missed: u64) -> Envelope {
    Envelope::new(EventKind::Error, json!({ "reason": "lagged", "missed": missed }))
}

pub(crate) fn error_envelope(err: &AppError) -> Envelope {
    if err.status().is_server_error() {
        tracing::error!(error = ?err, "push request failed");
        Envelope::new(EventKind::Error, json!({ "reason": err.kind() }))
    } else {
        Envelope::new(EventKind::Error, json!({ "reason": err.kind(), "message": err.to_string() }))
    }
}

/// Writes feed events, direct replies and heartbeats to one socket until
/// either side goes away.
pub(crate) async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut feed: Feed,
    mut replies: mpsc::Receiver<Envelope>,
    heartbeat: Duration,
    viewer: Uuid,
) {
    let heartbeat = heartbeat.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

    loop {
        let envelope = tokio::select! {
            item = feed.next() => match item {
                Some(Ok(envelope)) if !visible_to(&envelope, viewer) => continue,
                Some(Ok(envelope)) => envelope,
                Some(Err(BroadcastStreamRecvError::Lagged(missed))) => lagged(missed),
                None => break,
            },
            Some(envelope) = replies.recv() => envelope,
            _ = ticker.tick() => Envelope::heartbeat(),
        };

        if sender.send(Message::Text(envelope.to_json().into())).await.is_err() {
            break;
        }
    }
}

/// One-way delivery of a feed as server-sent events, each named after its
/// envelope type. Heartbeat envelopes fill quiet periods so clients can spot
/// a dead stream; the hub is cleaned up once the client goes away.
pub(crate) fn sse(
    feed: Feed,
    viewer: Uuid,
    heartbeat: Duration,
    hub: StreamHub,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let heartbeat = heartbeat.max(Duration::from_secs(1));
    let beats = IntervalStream::new(tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat))
        .map(|_| Ok(Envelope::heartbeat()));
    let guard = hub.cleanup_guard();

    let connected = tokio_stream::once(Ok::<_, Infallible>(Event::default().event("connected").data("ok")));

    let events = feed.merge(beats).filter_map(move |item| {
        let _guard = &guard;
        let envelope = match item {
            Ok(envelope) if !visible_to(&envelope, viewer) => return None,
            Ok(envelope) => envelope,
            Err(BroadcastStreamRecvError::Lagged(missed)) => lagged(missed),
        };
        Event::default()
            .event(envelope.kind.as_str())
            .json_data(&envelope)
            .ok()
            .map(Ok)
    });

    Sse::new(connected.chain(events))
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;

    #[test]
    fn own_typing_is_hidden() {
        let me = Uuid::now_v7();
        let other = Uuid::now_v7();
        let typing = Envelope::new(EventKind::Typing, json!({ "user_id": me }));

        assert!(!visible_to(&typing, me));
        assert!(visible_to(&typing, other));
        assert!(visible_to(&Envelope::heartbeat(), me));
    }

    #[tokio::test]
    async fn merged_feeds_deliver_both_topics() {
        let (a_tx, a_rx) = broadcast::channel(4);
        let (b_tx, b_rx) = broadcast::channel(4);
        let mut merged = merge(feed(a_rx), feed(b_rx));

        a_tx.send(Envelope::new(EventKind::ChatRejected, 1)).unwrap();
        b_tx.send(Envelope::new(EventKind::ChatRequest, 2)).unwrap();

        let mut kinds = vec![
            merged.next().await.unwrap().unwrap().kind,
            merged.next().await.unwrap().unwrap().kind,
        ];
        kinds.sort_by_key(|kind| kind.as_str());
        assert_eq!(kinds, vec![EventKind::ChatRejected, EventKind::ChatRequest]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sse_streams_carry_heartbeats() {
        let hub = StreamHub::default();
        let rx = hub.subscribe("user:quiet").await;
        let response = sse(feed(rx), Uuid::now_v7(), Duration::from_secs(5), hub.clone()).into_response();
        let mut body = response.into_body().into_data_stream();

        let mut text = String::new();
        while !text.contains("event: heartbeat") {
            let chunk = body.next().await.unwrap().unwrap();
            text.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        assert!(text.contains("event: connected"));
        assert!(text.contains(r#"{"type":"heartbeat","data":null}"#));
    }

    #[tokio::test]
    async fn dropped_sse_streams_release_their_topic() {
        let hub = StreamHub::default();
        let rx = hub.subscribe("user:gone").await;
        let response = sse(feed(rx), Uuid::now_v7(), Duration::from_secs(25), hub.clone()).into_response();
        assert_eq!(hub.topic_count().await, 1);

        drop(response);
        for _ in 0..10 {
            if hub.topic_count().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hub.topic_count().await, 0);
    }
}
