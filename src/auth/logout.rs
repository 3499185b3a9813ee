use axum::{debug_handler, extract::State, http::StatusCode};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{AppResult, AppState};

use super::Identity;

#[debug_handler(state = AppState)]
pub(crate) async fn logout(
    State(db_pool): State<SqlitePool>,
    identity: Identity,
    session: Session,
) -> AppResult<StatusCode> {
    if let Some(token) = &identity.token {
        sqlx::query("DELETE FROM tokens WHERE token=?")
            .bind(token)
            .execute(&db_pool)
            .await?;
    }
    session.clear().await;

    tracing::info!(user_id = %identity.id(), "logged out");
    Ok(StatusCode::NO_CONTENT)
}
