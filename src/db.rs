use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AppResult;

// ids are stored as hyphenated text, timestamps as unix milliseconds
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    handle      TEXT NOT NULL UNIQUE COLLATE NOCASE,
    alias       TEXT NOT NULL,
    role        TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    token       TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pets (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL REFERENCES users(id),
    name        TEXT NOT NULL,
    species     TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('lost', 'found', 'adoption')),
    description TEXT NOT NULL DEFAULT '',
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_requests (
    id           TEXT PRIMARY KEY,
    requester_id TEXT NOT NULL REFERENCES users(id),
    target_id    TEXT NOT NULL REFERENCES users(id),
    pet_id       TEXT NOT NULL REFERENCES pets(id),
    message      TEXT NOT NULL,
    status       TEXT NOT NULL CHECK (status IN ('pending', 'admin_approved', 'user_accepted', 'rejected')),
    admin_note   TEXT,
    reviewed_by  TEXT REFERENCES users(id),
    rejected_by  TEXT CHECK (rejected_by IN ('admin', 'target', 'expired')),
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS chat_requests_status ON chat_requests (status, created_at);

CREATE TABLE IF NOT EXISTS chat_rooms (
    id           TEXT PRIMARY KEY,
    request_id   TEXT NOT NULL UNIQUE REFERENCES chat_requests(id),
    requester_id TEXT NOT NULL REFERENCES users(id),
    target_id    TEXT NOT NULL REFERENCES users(id),
    created_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT NOT NULL UNIQUE,
    room_id     TEXT NOT NULL REFERENCES chat_rooms(id),
    sender_id   TEXT NOT NULL REFERENCES users(id),
    content     TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    read_at     INTEGER
);
CREATE INDEX IF NOT EXISTS messages_room ON messages (room_id, seq);
"#;

/// Opens the pool and makes sure the schema exists.
///
/// An in-memory url gets a single long-lived connection, otherwise every pooled
/// connection would see its own empty database.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?
    };

    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    Ok(pool)
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_ms(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

pub fn parse_id(raw: &str) -> AppResult<Uuid> {
    Ok(Uuid::parse_str(raw)?)
}

pub fn parse_opt_id(raw: Option<&str>) -> AppResult<Option<Uuid>> {
    raw.map(parse_id).transpose()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Role {
        if raw == "admin" { Role::Admin } else { Role::User }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub handle: String,
    pub alias: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub(crate) type UserRow = (String, String, String, String, i64);

impl User {
    pub(crate) const COLUMNS: &'static str = "id,handle,alias,role,created_at";

    pub(crate) fn from_row((id, handle, alias, role, created_at): UserRow) -> AppResult<User> {
        Ok(User {
            id: parse_id(&id)?,
            handle,
            alias,
            role: Role::parse(&role),
            created_at: from_ms(created_at),
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub async fn find_user(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<User>> {
    let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {} FROM users WHERE id=?", User::COLUMNS))
        .bind(id.to_string())
        .fetch_optional(db_pool)
        .await?;
    row.map(User::from_row).transpose()
}
