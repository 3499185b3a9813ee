use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{db, AppResult};

use super::lifecycle::{Actor, RequestStatus, Transition};

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub target_id: Uuid,
    pub pet_id: Uuid,
    pub message: String,
    pub status: RequestStatus,
    pub admin_note: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub rejected_by: Option<Actor>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct ChatRequestRow {
    id: String,
    requester_id: String,
    target_id: String,
    pet_id: String,
    message: String,
    status: String,
    admin_note: Option<String>,
    reviewed_by: Option<String>,
    rejected_by: Option<String>,
    created_at: i64,
    updated_at: i64,
}

const COLUMNS: &str = "id,requester_id,target_id,pet_id,message,status,admin_note,reviewed_by,rejected_by,created_at,updated_at";

impl TryFrom<ChatRequestRow> for ChatRequest {
    type Error = crate::AppError;

    fn try_from(row: ChatRequestRow) -> AppResult<ChatRequest> {
        let rejected_by = match row.rejected_by.as_deref() {
            None => None,
            Some("admin") => Some(Actor::Admin),
            Some("target") => Some(Actor::Target),
            Some("expired") => Some(Actor::Expiry),
            Some(other) => return Err(anyhow::anyhow!("unknown rejected_by {other:?}").into()),
        };

        Ok(ChatRequest {
            id: db::parse_id(&row.id)?,
            requester_id: db::parse_id(&row.requester_id)?,
            target_id: db::parse_id(&row.target_id)?,
            pet_id: db::parse_id(&row.pet_id)?,
            message: row.message,
            status: row.status.parse()?,
            admin_note: row.admin_note,
            reviewed_by: db::parse_opt_id(row.reviewed_by.as_deref())?,
            rejected_by,
            created_at: db::from_ms(row.created_at),
            updated_at: db::from_ms(row.updated_at),
        })
    }
}

fn collect(rows: Vec<ChatRequestRow>) -> AppResult<Vec<ChatRequest>> {
    rows.into_iter().map(ChatRequest::try_from).collect()
}

impl ChatRequest {
    pub fn new(requester_id: Uuid, target_id: Uuid, pet_id: Uuid, message: String) -> ChatRequest {
        let now = db::from_ms(db::now_ms());
        ChatRequest {
            id: Uuid::now_v7(),
            requester_id,
            target_id,
            pet_id,
            message,
            status: RequestStatus::Pending,
            admin_note: None,
            reviewed_by: None,
            rejected_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.target_id == user_id
    }
}

fn to_ms(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub async fn insert(db_pool: &SqlitePool, request: &ChatRequest) -> AppResult<()> {
    sqlx::query(&format!("INSERT INTO chat_requests ({COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?)"))
        .bind(request.id.to_string())
        .bind(request.requester_id.to_string())
        .bind(request.target_id.to_string())
        .bind(request.pet_id.to_string())
        .bind(&request.message)
        .bind(request.status.as_str())
        .bind(&request.admin_note)
        .bind(request.reviewed_by.map(|id| id.to_string()))
        .bind(request.rejected_by.map(|actor| actor.as_str()))
        .bind(to_ms(request.created_at))
        .bind(to_ms(request.updated_at))
        .execute(db_pool)
        .await?;
    Ok(())
}

pub async fn find(db_pool: &SqlitePool, id: Uuid) -> AppResult<Option<ChatRequest>> {
    let row: Option<ChatRequestRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM chat_requests WHERE id=?"))
        .bind(id.to_string())
        .fetch_optional(db_pool)
        .await?;
    row.map(ChatRequest::try_from).transpose()
}

/// Requests the user sent or received, newest first.
pub async fn list_for_user(db_pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<ChatRequest>> {
    let rows = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM chat_requests WHERE requester_id=?1 OR target_id=?1 ORDER BY created_at DESC, id DESC"
    ))
        .bind(user_id.to_string())
        .fetch_all(db_pool)
        .await?;
    collect(rows)
}

/// Moderation queue; oldest first so reviewers work in arrival order.
pub async fn list_by_status(db_pool: &SqlitePool, status: Option<RequestStatus>) -> AppResult<Vec<ChatRequest>> {
    let rows = match status {
        Some(status) => sqlx::query_as(&format!("SELECT {COLUMNS} FROM chat_requests WHERE status=? ORDER BY created_at, id"))
            .bind(status.as_str())
            .fetch_all(db_pool)
            .await?,
        None => sqlx::query_as(&format!("SELECT {COLUMNS} FROM chat_requests ORDER BY created_at, id"))
            .fetch_all(db_pool)
            .await?,
    };
    collect(rows)
}

pub async fn has_open(db_pool: &SqlitePool, requester_id: Uuid, target_id: Uuid, pet_id: Uuid) -> AppResult<bool> {
    let found: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM chat_requests WHERE requester_id=? AND target_id=? AND pet_id=? AND status IN ('pending','admin_approved') LIMIT 1",
    )
        .bind(requester_id.to_string())
        .bind(target_id.to_string())
        .bind(pet_id.to_string())
        .fetch_optional(db_pool)
        .await?;
    Ok(found.is_some())
}

pub async fn pending_before(db_pool: &SqlitePool, cutoff_ms: i64) -> AppResult<Vec<ChatRequest>> {
    let rows = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM chat_requests WHERE status='pending' AND created_at < ? ORDER BY created_at"
    ))
        .bind(cutoff_ms)
        .fetch_all(db_pool)
        .await?;
    collect(rows)
}

/// Who applied a transition and why.
#[derive(Debug, Clone)]
pub struct Review {
    pub actor: Actor,
    pub reviewer: Option<Uuid>,
    pub note: Option<String>,
}

/// Compare-and-set on the status column.
///
/// Returns `false` when the row is missing or no longer in one of the
/// transition's source states. Acceptance goes through
/// [`crate::rooms::materialize`] instead, since it must create the room in
/// the same transaction.
pub async fn apply(db_pool: &SqlitePool, id: Uuid, transition: Transition, review: &Review) -> AppResult<bool> {
    debug_assert!(transition != Transition::Accept);

    let sources = transition.sources();
    let placeholders = vec!["?"; sources.len()].join(",");
    let sql = format!(
        "UPDATE chat_requests \
         SET status=?, admin_note=COALESCE(?, admin_note), reviewed_by=COALESCE(?, reviewed_by), rejected_by=?, updated_at=? \
         WHERE id=? AND status IN ({placeholders})"
    );

    let rejected_by = (transition == Transition::Reject).then(|| review.actor.as_str());
    let mut query = sqlx::query(&sql)
        .bind(transition.target().as_str())
        .bind(&review.note)
        .bind(review.reviewer.map(|id| id.to_string()))
        .bind(rejected_by)
        .bind(db::now_ms())
        .bind(id.to_string());
    for status in sources {
        query = query.bind(status.as_str());
    }

    Ok(query.execute(db_pool).await?.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth, db::Role};

    async fn seeded() -> (SqlitePool, ChatRequest) {
        let db_pool = db::connect("sqlite::memory:").await.unwrap();
        let requester = auth::create_user(&db_pool, "finder", Role::User).await.unwrap();
        let owner = auth::create_user(&db_pool, "owner", Role::User).await.unwrap();

        let pet_id = Uuid::now_v7();
        sqlx::query("INSERT INTO pets (id,owner_id,name,species,status,created_at) VALUES (?,?,'Rex','dog','lost',0)")
            .bind(pet_id.to_string())
            .bind(owner.id.to_string())
            .execute(&db_pool)
            .await
            .unwrap();

        let request = ChatRequest::new(requester.id, owner.id, pet_id, "this is my dog".to_owned());
        insert(&db_pool, &request).await.unwrap();
        (db_pool, request)
    }

    fn admin_review(note: &str) -> Review {
        Review { actor: Actor::Admin, reviewer: None, note: Some(note.to_owned()) }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let (db_pool, request) = seeded().await;
        let found = find(&db_pool, request.id).await.unwrap().unwrap();
        assert_eq!(found.status, RequestStatus::Pending);
        assert_eq!(found.message, "this is my dog");
        assert!(find(&db_pool, Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_set_only_moves_from_sources() {
        let (db_pool, request) = seeded().await;

        assert!(apply(&db_pool, request.id, Transition::Approve, &admin_review("looks legit")).await.unwrap());
        // already approved: approve is no longer open
        assert!(!apply(&db_pool, request.id, Transition::Approve, &admin_review("again")).await.unwrap());

        let approved = find(&db_pool, request.id).await.unwrap().unwrap();
        assert_eq!(approved.status, RequestStatus::AdminApproved);
        assert_eq!(approved.admin_note.as_deref(), Some("looks legit"));
        assert_eq!(approved.rejected_by, None);

        let by_target = Review { actor: Actor::Target, reviewer: None, note: None };
        assert!(apply(&db_pool, request.id, Transition::Reject, &by_target).await.unwrap());
        assert!(!apply(&db_pool, request.id, Transition::Reject, &by_target).await.unwrap());

        let rejected = find(&db_pool, request.id).await.unwrap().unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(rejected.rejected_by, Some(Actor::Target));
        // note from the approval is kept
        assert_eq!(rejected.admin_note.as_deref(), Some("looks legit"));
    }

    #[tokio::test]
    async fn open_requests_are_detected() {
        let (db_pool, request) = seeded().await;
        assert!(has_open(&db_pool, request.requester_id, request.target_id, request.pet_id).await.unwrap());

        apply(&db_pool, request.id, Transition::Reject, &admin_review("no")).await.unwrap();
        assert!(!has_open(&db_pool, request.requester_id, request.target_id, request.pet_id).await.unwrap());
    }
}
