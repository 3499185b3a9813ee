use axum::{debug_handler, extract::{Path, State}, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::Identity, notifications, rooms::{self, ChatRoom}, AppError, AppResult, AppState, StreamHub};

use super::{apply_transition, store, visible_request, Actor, ChatRequest, RequestStatus, Review, Transition};

#[derive(Debug, Serialize)]
pub(crate) struct AcceptResponse {
    request: ChatRequest,
    room: ChatRoom,
}

fn require_target(request: &ChatRequest, identity: &Identity, transition: Transition) -> AppResult<()> {
    if request.target_id != identity.id() {
        return Err(AppError::Forbidden(format!("only the contacted user can {transition} this request")));
    }
    Ok(())
}

/// Target accepts an approved request, materializing the room.
///
/// Repeating the call (or racing it) returns the same room; only the call that
/// created the room notifies the requester.
#[debug_handler(state = AppState)]
pub(crate) async fn accept(
    State(db_pool): State<SqlitePool>,
    State(hub): State<StreamHub>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AcceptResponse>> {
    let request = visible_request(&db_pool, id, &identity).await?;
    require_target(&request, &identity, Transition::Accept)?;

    if request.status != RequestStatus::UserAccepted {
        request.status.next(Transition::Accept, Actor::Target)?;
    }

    let Some(rooms::Materialized { room, created }) = rooms::materialize(&db_pool, &request).await? else {
        // moved on (rejected) between the read and the transaction
        let current = store::find(&db_pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound("chat request".to_owned()))?;
        current.status.next(Transition::Accept, Actor::Target)?;
        return Err(anyhow::anyhow!("chat request {id} accepted without a room").into());
    };

    let request = store::find(&db_pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("chat request".to_owned()))?;

    if created {
        tracing::info!(request_id = %request.id, room_id = %room.id, "chat room created");
        notifications::to_user(&hub, request.requester_id, notifications::request_accepted(&request, room.id)).await;
    }

    Ok(Json(AcceptResponse { request, room }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn decline(
    State(db_pool): State<SqlitePool>,
    State(hub): State<StreamHub>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ChatRequest>> {
    let request = visible_request(&db_pool, id, &identity).await?;
    require_target(&request, &identity, Transition::Reject)?;

    let review = Review { actor: Actor::Target, reviewer: None, note: None };
    Ok(Json(apply_transition(&db_pool, &hub, &request, Transition::Reject, review).await?))
}
