use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::Identity, AppError, AppResult, AppState, StreamHub};

use super::{apply_transition, store, Actor, ChatRequest, RequestStatus, Review, Transition};

#[derive(Debug, Deserialize)]
pub(crate) struct NoteBody {
    #[serde(default)]
    note: Option<String>,
}

impl NoteBody {
    fn into_note(self) -> Option<String> {
        self.note.map(|n| n.trim().to_owned()).filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueueQuery {
    status: Option<RequestStatus>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn queue(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
    Query(QueueQuery { status }): Query<QueueQuery>,
) -> AppResult<Json<Vec<ChatRequest>>> {
    identity.require_admin()?;
    Ok(Json(store::list_by_status(&db_pool, status).await?))
}

async fn moderate(
    db_pool: &SqlitePool,
    hub: &StreamHub,
    identity: &Identity,
    id: Uuid,
    transition: Transition,
    note: Option<String>,
) -> AppResult<ChatRequest> {
    identity.require_admin()?;
    let Some(request) = store::find(db_pool, id).await? else {
        return Err(AppError::NotFound("chat request".to_owned()));
    };

    let review = Review { actor: Actor::Admin, reviewer: Some(identity.id()), note };
    apply_transition(db_pool, hub, &request, transition, review).await
}

#[debug_handler(state = AppState)]
pub(crate) async fn approve(
    State(db_pool): State<SqlitePool>,
    State(hub): State<StreamHub>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<NoteBody>,
) -> AppResult<Json<ChatRequest>> {
    Ok(Json(moderate(&db_pool, &hub, &identity, id, Transition::Approve, body.into_note()).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn reject(
    State(db_pool): State<SqlitePool>,
    State(hub): State<StreamHub>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(body): Json<NoteBody>,
) -> AppResult<Json<ChatRequest>> {
    Ok(Json(moderate(&db_pool, &hub, &identity, id, Transition::Reject, body.into_note()).await?))
}
