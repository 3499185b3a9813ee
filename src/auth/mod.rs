use axum::{routing::{get, post}, Router};
use rand::seq::IndexedRandom;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{db::{self, Role, User}, AppError, AppResult, AppState};

mod identity;
mod login;
mod logout;

pub use identity::Identity;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login::login))
        .route("/logout", post(logout::logout))
        .route("/me", get(login::me))
}

pub(crate) async fn create_user(db_pool: &SqlitePool, handle: &str, role: Role) -> AppResult<User> {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
        "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sleepy",
        "Eager", "Fluffy", "Rusty", "Golden", "Silver", "Bright", "Scruffy", "Lucky",
    ];
    let nouns = [
        "Fox", "Beagle", "Tabby", "Collie", "Parrot", "Terrier", "Hamster", "Owl", "Rabbit",
        "Ferret", "Poodle", "Husky", "Corgi", "Kitten", "Puppy", "Tortoise", "Dachshund",
        "Pug", "Turtle", "Gecko", "Retriever", "Spaniel", "Mouse", "Budgie",
    ];
    let alias = {
        let mut rng = rand::rng();
        format!(
            "{} {}",
            adjectives.choose(&mut rng).copied().unwrap_or("Nameless"),
            nouns.choose(&mut rng).copied().unwrap_or("Pet"),
        )
    };

    let created_at = db::now_ms();
    let user = User {
        id: Uuid::now_v7(),
        handle: handle.to_owned(),
        alias,
        role,
        created_at: db::from_ms(created_at),
    };

    // a concurrent first login may have claimed the handle already
    let inserted = sqlx::query(
        "INSERT INTO users (id,handle,alias,role,created_at) VALUES (?,?,?,?,?) ON CONFLICT(handle) DO NOTHING",
    )
        .bind(user.id.to_string())
        .bind(&user.handle)
        .bind(&user.alias)
        .bind(user.role.as_str())
        .bind(created_at)
        .execute(db_pool)
        .await?
        .rows_affected();

    if inserted == 0 {
        return find_user_by_handle(db_pool, handle)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {handle}")));
    }

    tracing::info!(user_id = %user.id, handle = %user.handle, alias = %user.alias, role = user.role.as_str(), "adding user");
    Ok(user)
}

pub(crate) async fn find_user_by_handle(db_pool: &SqlitePool, handle: &str) -> AppResult<Option<User>> {
    let row: Option<db::UserRow> = sqlx::query_as(&format!("SELECT {} FROM users WHERE handle=?", User::COLUMNS))
        .bind(handle)
        .fetch_optional(db_pool)
        .await?;
    row.map(User::from_row).transpose()
}

pub(crate) async fn issue_token(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<String> {
    let bytes: [u8; 32] = rand::random();
    let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

    sqlx::query("INSERT INTO tokens (token,user_id,created_at) VALUES (?,?,?)")
        .bind(&token)
        .bind(user_id.to_string())
        .bind(db::now_ms())
        .execute(db_pool)
        .await?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creating_a_taken_handle_returns_the_existing_user() {
        let db_pool = db::connect("sqlite::memory:").await.unwrap();

        let first = create_user(&db_pool, "finder", Role::User).await.unwrap();
        let second = create_user(&db_pool, "finder", Role::User).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.alias, second.alias);
    }
}
