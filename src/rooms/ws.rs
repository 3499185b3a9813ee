use std::convert::Infallible;

use axum::{
    debug_handler,
    extract::{ws::{Message as WsMessage, WebSocket}, Path, State, WebSocketUpgrade},
    response::{sse::{Event, Sse}, IntoResponse, Response},
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{auth::Identity, events::{Envelope, EventKind}, hub, push, AppResult, AppState};

use super::{msg, room::{require_participant, ChatRoom}};

/// Frames a participant may send over the room socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ClientFrame {
    Message { content: String },
    Typing,
    Read { message_id: Uuid },
}

fn presence(user_id: Uuid, online: bool) -> Envelope {
    Envelope::new(EventKind::Presence, json!({ "user_id": user_id, "online": online }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<Uuid>,
    State(app_state): State<AppState>,
    identity: Identity,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let room = require_participant(&app_state.db_pool, room_id, identity.id()).await?;
    let user_id = identity.id();

    Ok(ws.on_upgrade(move |stream| serve(app_state, room, user_id, stream)).into_response())
}

async fn serve(app_state: AppState, room: ChatRoom, user_id: Uuid, stream: WebSocket) {
    let topic = hub::room_topic(room.id);
    let feed = push::feed(app_state.hub.subscribe(&topic).await);
    let (sender, mut receiver) = stream.split();
    let (reply_tx, reply_rx) = mpsc::channel(16);

    tracing::info!(room_id = %room.id, %user_id, "room socket open");
    app_state.hub.publish(&topic, presence(user_id, true)).await;

    let mut write_task = tokio::spawn(push::write_loop(
        sender,
        feed,
        reply_rx,
        app_state.config.heartbeat_interval,
        user_id,
    ));

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = &mut write_task => break,
        };
        let text = match frame {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => continue,
        };

        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
            Ok(frame) => handle_frame(&app_state, &room, user_id, frame).await,
            Err(e) => Some(Envelope::error(format!("malformed frame: {e}"))),
        };
        if let Some(reply) = reply {
            let _ = reply_tx.send(reply).await;
        }
    }

    write_task.abort();
    app_state.hub.publish(&topic, presence(user_id, false)).await;
    app_state.hub.cleanup().await;
    tracing::info!(room_id = %room.id, %user_id, "room socket closed");
}

/// Returns an envelope to send back to this socket only, if any.
async fn handle_frame(app_state: &AppState, room: &ChatRoom, user_id: Uuid, frame: ClientFrame) -> Option<Envelope> {
    match frame {
        ClientFrame::Message { content } => {
            let posted = msg::post_message(
                &app_state.db_pool,
                &app_state.hub,
                &app_state.sequencer,
                room,
                user_id,
                &content,
            ).await;
            posted.err().map(|e| push::error_envelope(&e))
        }
        ClientFrame::Typing => {
            // not persisted; expiry is up to the receiving clients
            app_state.hub
                .publish(&hub::room_topic(room.id), Envelope::new(EventKind::Typing, json!({ "user_id": user_id })))
                .await;
            None
        }
        ClientFrame::Read { message_id } => {
            msg::spawn_mark_read(app_state.db_pool.clone(), room.id, message_id, user_id);
            None
        }
    }
}

/// One-way room stream for clients that can't hold a socket.
#[debug_handler(state = AppState)]
pub(crate) async fn room_events(
    Path(room_id): Path<Uuid>,
    State(app_state): State<AppState>,
    identity: Identity,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let room = require_participant(&app_state.db_pool, room_id, identity.id()).await?;
    let feed = push::feed(app_state.hub.subscribe(&hub::room_topic(room.id)).await);
    Ok(push::sse(feed, identity.id(), app_state.config.heartbeat_interval, app_state.hub.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse() {
        let frame: ClientFrame = serde_json::from_str(r#"{"type":"message","data":{"content":"hi"}}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Message { content } if content == "hi"));

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"typing"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Typing));

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"shout"}"#).is_err());
    }
}
