use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::Identity, db, requests::ChatRequest, AppError, AppResult, AppState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub request_id: Uuid,
    pub participants: [Uuid; 2],
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

type RoomRow = (String, String, String, String, i64);

const COLUMNS: &str = "id,request_id,requester_id,target_id,created_at";

impl ChatRoom {
    fn from_row((id, request_id, requester_id, target_id, created_at): RoomRow) -> AppResult<ChatRoom> {
        Ok(ChatRoom {
            id: db::parse_id(&id)?,
            request_id: db::parse_id(&request_id)?,
            participants: [db::parse_id(&requester_id)?, db::parse_id(&target_id)?],
            created_at: db::from_ms(created_at),
        })
    }

    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }
}

#[derive(Debug, Clone)]
pub struct Materialized {
    pub room: ChatRoom,
    /// `false` when an earlier accept already created the room.
    pub created: bool,
}

/// Flips `admin_approved → user_accepted` and creates the request's room in
/// one transaction.
///
/// The request id is the idempotency key: the unique index on
/// `chat_rooms.request_id` means racing accepts end up with the same room.
/// Returns `None` when the request is in neither of those states.
pub async fn materialize(db_pool: &SqlitePool, request: &ChatRequest) -> AppResult<Option<Materialized>> {
    let now = db::now_ms();
    let mut tx = db_pool.begin().await?;

    let flipped = sqlx::query("UPDATE chat_requests SET status='user_accepted', updated_at=? WHERE id=? AND status='admin_approved'")
        .bind(now)
        .bind(request.id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected() == 1;

    let mut created = false;
    if flipped {
        created = sqlx::query(
            "INSERT INTO chat_rooms (id,request_id,requester_id,target_id,created_at) VALUES (?,?,?,?,?) \
             ON CONFLICT(request_id) DO NOTHING",
        )
            .bind(Uuid::now_v7().to_string())
            .bind(request.id.to_string())
            .bind(request.requester_id.to_string())
            .bind(request.target_id.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected() == 1;
    }

    let row: Option<RoomRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM chat_rooms WHERE request_id=?"))
        .bind(request.id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(match row {
        Some(row) => Some(Materialized { room: ChatRoom::from_row(row)?, created }),
        None => None,
    })
}

pub async fn find_room(db_pool: &SqlitePool, room_id: Uuid) -> AppResult<Option<ChatRoom>> {
    let row: Option<RoomRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM chat_rooms WHERE id=?"))
        .bind(room_id.to_string())
        .fetch_optional(db_pool)
        .await?;
    row.map(ChatRoom::from_row).transpose()
}

pub async fn room_for_request(db_pool: &SqlitePool, request_id: Uuid) -> AppResult<Option<ChatRoom>> {
    let row: Option<RoomRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM chat_rooms WHERE request_id=?"))
        .bind(request_id.to_string())
        .fetch_optional(db_pool)
        .await?;
    row.map(ChatRoom::from_row).transpose()
}

pub(crate) async fn require_participant(db_pool: &SqlitePool, room_id: Uuid, user_id: Uuid) -> AppResult<ChatRoom> {
    let Some(room) = find_room(db_pool, room_id).await? else {
        return Err(AppError::NotFound("room".to_owned()));
    };
    if !room.has_participant(user_id) {
        return Err(AppError::Forbidden("not a participant of this room".to_owned()));
    }
    Ok(room)
}

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
    Path(room_id): Path<Uuid>,
) -> AppResult<Json<ChatRoom>> {
    Ok(Json(require_participant(&db_pool, room_id, identity.id()).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn my_rooms(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
) -> AppResult<Json<Vec<ChatRoom>>> {
    let rows: Vec<RoomRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM chat_rooms WHERE requester_id=?1 OR target_id=?1 ORDER BY created_at DESC"
    ))
        .bind(identity.id().to_string())
        .fetch_all(&db_pool)
        .await?;

    Ok(Json(rows.into_iter().map(ChatRoom::from_row).collect::<AppResult<_>>()?))
}
