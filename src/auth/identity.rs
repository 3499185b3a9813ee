use axum::{extract::{FromRef, FromRequestParts, Query}, http::{header::AUTHORIZATION, request::Parts}};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{db::{self, User}, session::USER_ID, AppError, AppResult};

/// The authenticated caller.
///
/// Looked up from `Authorization: Bearer`, then `?token=` (push transports
/// can't set headers), then the cookie session.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
    pub token: Option<String>,
}

impl Identity {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_admin()
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("admin access required".to_owned()))
        }
    }
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer(parts: &Parts) -> Option<String> {
    parts.headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_owned)
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri).ok()?.0.token
}

async fn user_for_token(db_pool: &SqlitePool, token: &str) -> AppResult<Option<User>> {
    let row: Option<db::UserRow> = sqlx::query_as(
        "SELECT u.id,u.handle,u.alias,u.role,u.created_at FROM tokens t JOIN users u ON u.id=t.user_id WHERE t.token=?",
    )
        .bind(token)
        .fetch_optional(db_pool)
        .await?;
    row.map(User::from_row).transpose()
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let db_pool = SqlitePool::from_ref(state);

        if let Some(token) = bearer(parts).or_else(|| query_token(parts)) {
            let Some(user) = user_for_token(&db_pool, &token).await? else {
                return Err(AppError::Unauthenticated);
            };
            return Ok(Identity { user, token: Some(token) });
        }

        let Ok(session) = Session::from_request_parts(parts, state).await else {
            return Err(AppError::Unauthenticated);
        };
        let Some(user_id) = session.get::<String>(USER_ID).await? else {
            return Err(AppError::Unauthenticated);
        };
        let Some(user) = db::find_user(&db_pool, db::parse_id(&user_id)?).await? else {
            return Err(AppError::Unauthenticated);
        };

        Ok(Identity { user, token: None })
    }
}
