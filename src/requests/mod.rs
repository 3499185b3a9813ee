pub mod expire;
pub mod lifecycle;
mod moderate;
mod respond;
pub mod store;
mod submit;

use axum::{routing::{get, post}, Router};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::Identity, notifications, AppError, AppResult, AppState, StreamHub};

pub use lifecycle::{Actor, RequestStatus, Transition, TransitionError};
pub use store::{ChatRequest, Review};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/requests", get(submit::my_requests).post(submit::submit))
        .route("/requests/{uuid}", get(submit::request))
        .route("/requests/{uuid}/accept", post(respond::accept))
        .route("/requests/{uuid}/decline", post(respond::decline))

        .route("/admin/requests", get(moderate::queue))
        .route("/admin/requests/{uuid}/approve", post(moderate::approve))
        .route("/admin/requests/{uuid}/reject", post(moderate::reject))
}

/// Loads a request the caller may see: its two participants and admins.
/// Anyone else gets not-found rather than learning that it exists.
pub(crate) async fn visible_request(db_pool: &SqlitePool, id: Uuid, identity: &Identity) -> AppResult<ChatRequest> {
    match store::find(db_pool, id).await? {
        Some(request) if request.involves(identity.id()) || identity.is_admin() => Ok(request),
        _ => Err(AppError::NotFound("chat request".to_owned())),
    }
}

/// Applies an approve or reject through the status compare-and-set, then
/// tells whoever the transition concerns.
pub async fn apply_transition(
    db_pool: &SqlitePool,
    hub: &StreamHub,
    request: &ChatRequest,
    transition: Transition,
    review: Review,
) -> AppResult<ChatRequest> {
    request.status.next(transition, review.actor)?;

    if !store::apply(db_pool, request.id, transition, &review).await? {
        // lost a race; report against whatever won
        let current = store::find(db_pool, request.id)
            .await?
            .ok_or_else(|| AppError::NotFound("chat request".to_owned()))?;
        current.status.next(transition, review.actor)?;
        return Err(anyhow::anyhow!("chat request {} changed while applying {transition}", request.id).into());
    }

    let updated = store::find(db_pool, request.id)
        .await?
        .ok_or_else(|| AppError::NotFound("chat request".to_owned()))?;

    tracing::info!(
        request_id = %updated.id,
        %transition,
        actor = review.actor.as_str(),
        from = %request.status,
        to = %updated.status,
        "chat request transition",
    );

    match transition {
        Transition::Approve => notifications::to_user(hub, updated.target_id, notifications::request_approved(&updated)).await,
        Transition::Reject => notifications::to_user(hub, updated.requester_id, notifications::request_rejected(&updated)).await,
        Transition::Accept => {}
    }

    Ok(updated)
}
