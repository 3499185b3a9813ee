use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use pulldown_cmark::{Event, Parser};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::Identity, db, events::{Envelope, EventKind}, hub, AppError, AppResult, AppState};

use super::{room::{require_participant, ChatRoom}, RoomSequencer};

const MAX_CONTENT: usize = 4000;
const HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub seq: i64,
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub html: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
}

type MessageRow = (i64, String, String, String, String, i64, Option<i64>);

impl Message {
    fn from_row((seq, id, room_id, sender_id, content, created_at, read_at): MessageRow) -> AppResult<Message> {
        Ok(Message {
            seq,
            id: db::parse_id(&id)?,
            room_id: db::parse_id(&room_id)?,
            sender_id: db::parse_id(&sender_id)?,
            html: render(&content),
            content,
            created_at: db::from_ms(created_at),
            read_at: read_at.map(db::from_ms),
        })
    }
}

/// Markdown to html, with raw html in the source shown as text.
pub(crate) fn render(content: &str) -> String {
    let parser = Parser::new(content).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        _ => event,
    });

    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Stores a message and broadcasts it to the room.
///
/// The insert and the publish happen under the room's sequencer lock, so
/// every subscriber sees messages in `seq` order.
pub(crate) async fn post_message(
    db_pool: &SqlitePool,
    hub: &hub::StreamHub,
    sequencer: &RoomSequencer,
    room: &ChatRoom,
    sender_id: Uuid,
    content: &str,
) -> AppResult<Message> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("message text is required".to_owned()));
    }
    if content.chars().count() > MAX_CONTENT {
        return Err(AppError::Validation(format!("message is longer than {MAX_CONTENT} characters")));
    }

    let lock = sequencer.lock_for(room.id);
    let _turn = lock.lock().await;

    let id = Uuid::now_v7();
    let created_at = db::now_ms();
    let seq = sqlx::query("INSERT INTO messages (id,room_id,sender_id,content,created_at) VALUES (?,?,?,?,?)")
        .bind(id.to_string())
        .bind(room.id.to_string())
        .bind(sender_id.to_string())
        .bind(content)
        .bind(created_at)
        .execute(db_pool)
        .await?
        .last_insert_rowid();

    let message = Message {
        seq,
        id,
        room_id: room.id,
        sender_id,
        content: content.to_owned(),
        html: render(content),
        created_at: db::from_ms(created_at),
        read_at: None,
    };

    let delivered = hub.publish(&hub::room_topic(room.id), Envelope::new(EventKind::Message, &message)).await;
    tracing::debug!(room_id = %room.id, seq, delivered, "message posted");

    Ok(message)
}

pub async fn history(db_pool: &SqlitePool, room_id: Uuid, after: Option<i64>, limit: i64) -> AppResult<Vec<Message>> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT seq,id,room_id,sender_id,content,created_at,read_at FROM messages \
         WHERE room_id=? AND seq>? ORDER BY seq LIMIT ?",
    )
        .bind(room_id.to_string())
        .bind(after.unwrap_or(0))
        .bind(limit)
        .fetch_all(db_pool)
        .await?;

    rows.into_iter().map(Message::from_row).collect()
}

/// Marks a message read by the other participant. Returns whether anything changed.
pub async fn mark_read(db_pool: &SqlitePool, room_id: Uuid, message_id: Uuid, reader_id: Uuid) -> AppResult<bool> {
    let result = sqlx::query(
        "UPDATE messages SET read_at=? WHERE id=? AND room_id=? AND sender_id<>? AND read_at IS NULL",
    )
        .bind(db::now_ms())
        .bind(message_id.to_string())
        .bind(room_id.to_string())
        .bind(reader_id.to_string())
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Read receipts never hold up the caller.
pub(crate) fn spawn_mark_read(db_pool: SqlitePool, room_id: Uuid, message_id: Uuid, reader_id: Uuid) {
    tokio::spawn(async move {
        if let Err(e) = mark_read(&db_pool, room_id, message_id, reader_id).await {
            tracing::warn!(%room_id, %message_id, error = %e, "failed to mark message read");
        }
    });
}

#[derive(Deserialize)]
pub(crate) struct SendMessageBody {
    content: String,
}

/// Synchronous send path, used when the client's socket is down.
#[debug_handler(state = AppState)]
pub(crate) async fn send_msg(
    State(app_state): State<AppState>,
    identity: Identity,
    Path(room_id): Path<Uuid>,
    Json(SendMessageBody { content }): Json<SendMessageBody>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let room = require_participant(&app_state.db_pool, room_id, identity.id()).await?;
    let message = post_message(
        &app_state.db_pool,
        &app_state.hub,
        &app_state.sequencer,
        &room,
        identity.id(),
        &content,
    ).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Deserialize)]
pub(crate) struct HistoryQuery {
    after: Option<i64>,
    limit: Option<i64>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn messages(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
    Path(room_id): Path<Uuid>,
    Query(HistoryQuery { after, limit }): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let room = require_participant(&db_pool, room_id, identity.id()).await?;
    let limit = limit.unwrap_or(HISTORY_LIMIT).clamp(1, HISTORY_LIMIT);
    Ok(Json(history(&db_pool, room.id, after, limit).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn read(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let room = require_participant(&db_pool, room_id, identity.id()).await?;
    spawn_mark_read(db_pool, room.id, message_id, identity.id());
    Ok(StatusCode::ACCEPTED)
}
