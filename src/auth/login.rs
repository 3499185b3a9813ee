use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{db::{Role, User}, session::USER_ID, AppError, AppResult, AppState, Config};

use super::{create_user, find_user_by_handle, issue_token, Identity};

#[derive(Deserialize)]
pub(crate) struct LoginBody {
    handle: String,
}

#[derive(Serialize)]
pub(crate) struct LoginResponse {
    token: String,
    #[serde(flatten)]
    user: User,
}

fn validate_handle(handle: &str) -> AppResult<()> {
    if handle.is_empty() || handle.len() > 32 {
        return Err(AppError::Validation("handle must be 1 to 32 characters".to_owned()));
    }
    if !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AppError::Validation("handle may only contain letters, digits, '_' and '-'".to_owned()));
    }
    Ok(())
}

/// Signs in by handle, creating the account on first use.
#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(db_pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    session: Session,
    Json(LoginBody { handle }): Json<LoginBody>,
) -> AppResult<Json<LoginResponse>> {
    let handle = handle.trim();
    validate_handle(handle)?;

    let user = match find_user_by_handle(&db_pool, handle).await? {
        Some(user) => user,
        None => {
            let role = if config.is_admin_handle(handle) { Role::Admin } else { Role::User };
            create_user(&db_pool, handle, role).await?
        }
    };

    let token = issue_token(&db_pool, user.id).await?;
    session.insert(USER_ID, user.id.to_string()).await?;

    tracing::info!(user_id = %user.id, handle = %user.handle, "welcome");
    Ok(Json(LoginResponse { token, user }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn me(identity: Identity) -> Json<User> {
    Json(identity.user)
}

#[cfg(test)]
mod tests {
    use super::validate_handle;

    #[test]
    fn handles_are_restricted() {
        assert!(validate_handle("rex_owner-1").is_ok());
        assert!(validate_handle("").is_err());
        assert!(validate_handle("two words").is_err());
        assert!(validate_handle(&"x".repeat(33)).is_err());
    }
}
