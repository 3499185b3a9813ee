use axum::{debug_handler, extract::{Path, State}, http::StatusCode, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::Identity, db, notifications, pets, AppError, AppResult, AppState, StreamHub};

use super::{store, visible_request, ChatRequest};

const MAX_MESSAGE: usize = 2000;

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitBody {
    pet_id: Uuid,
    /// Defaults to the pet's owner.
    target_id: Option<Uuid>,
    message: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn submit(
    State(db_pool): State<SqlitePool>,
    State(hub): State<StreamHub>,
    identity: Identity,
    Json(SubmitBody { pet_id, target_id, message }): Json<SubmitBody>,
) -> AppResult<(StatusCode, Json<ChatRequest>)> {
    let message = message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("a message explaining the request is required".to_owned()));
    }
    if message.chars().count() > MAX_MESSAGE {
        return Err(AppError::Validation(format!("message is longer than {MAX_MESSAGE} characters")));
    }

    let Some(pet) = pets::find_pet(&db_pool, pet_id).await? else {
        return Err(AppError::NotFound("pet".to_owned()));
    };
    let target_id = target_id.unwrap_or(pet.owner_id);
    if target_id == identity.id() {
        return Err(AppError::Validation("cannot request a chat with yourself".to_owned()));
    }
    if db::find_user(&db_pool, target_id).await?.is_none() {
        return Err(AppError::NotFound("target user".to_owned()));
    }
    if store::has_open(&db_pool, identity.id(), target_id, pet.id).await? {
        return Err(AppError::Validation("a chat request about this pet is already open".to_owned()));
    }

    let request = ChatRequest::new(identity.id(), target_id, pet.id, message.to_owned());
    store::insert(&db_pool, &request).await?;

    tracing::info!(
        request_id = %request.id,
        requester_id = %request.requester_id,
        target_id = %request.target_id,
        pet_id = %request.pet_id,
        "chat request submitted",
    );
    notifications::to_admins(&hub, notifications::request_submitted(&request)).await;

    Ok((StatusCode::CREATED, Json(request)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn my_requests(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
) -> AppResult<Json<Vec<ChatRequest>>> {
    Ok(Json(store::list_for_user(&db_pool, identity.id()).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn request(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ChatRequest>> {
    Ok(Json(visible_request(&db_pool, id, &identity).await?))
}
