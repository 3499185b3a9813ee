use std::convert::Infallible;

use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade},
    response::{sse::{Event, Sse}, Response},
};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::{auth::Identity, hub::{self, StreamHub}, push::{self, Feed}, AppState};

/// Own topic, plus the shared admin topic for admins.
async fn subscribe(hub: &StreamHub, identity: &Identity) -> Feed {
    let own = push::feed(hub.subscribe(&hub::user_topic(identity.id())).await);
    if identity.is_admin() {
        push::merge(own, push::feed(hub.subscribe(hub::ADMINS).await))
    } else {
        own
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn notifications_ws(
    State(app_state): State<AppState>,
    identity: Identity,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |stream| serve(app_state, identity, stream))
}

async fn serve(app_state: AppState, identity: Identity, stream: WebSocket) {
    let feed = subscribe(&app_state.hub, &identity).await;
    let (sender, mut receiver) = stream.split();
    // nothing is ever sent back directly on this socket
    let (_reply_tx, reply_rx) = mpsc::channel(1);

    tracing::info!(user_id = %identity.id(), "notification socket open");
    let mut write_task = tokio::spawn(push::write_loop(
        sender,
        feed,
        reply_rx,
        app_state.config.heartbeat_interval,
        identity.id(),
    ));

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut write_task => break,
        }
    }

    write_task.abort();
    app_state.hub.cleanup().await;
    tracing::info!(user_id = %identity.id(), "notification socket closed");
}

#[debug_handler(state = AppState)]
pub(crate) async fn notification_events(
    State(app_state): State<AppState>,
    identity: Identity,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let feed = subscribe(&app_state.hub, &identity).await;
    push::sse(feed, identity.id(), app_state.config.heartbeat_interval, app_state.hub.clone())
}
