//! Auto-rejection of pending requests nobody has reviewed within the TTL.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::{db, AppResult, AppState};

use super::{apply_transition, store, Actor, ChatRequest, Review, Transition};

pub fn spawn_sweeper(app_state: AppState, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            match expire_stale(&app_state, ttl).await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!(count = expired.len(), "expired stale chat requests");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "pending request sweep failed"),
            }
        }
    })
}

/// Rejects every pending request created more than `ttl` ago.
///
/// Requests an admin acts on mid-sweep are skipped, not reported.
pub async fn expire_stale(app_state: &AppState, ttl: Duration) -> AppResult<Vec<ChatRequest>> {
    let cutoff = db::now_ms() - ttl.as_millis() as i64;
    let stale = store::pending_before(&app_state.db_pool, cutoff).await?;

    let mut expired = Vec::with_capacity(stale.len());
    for request in stale {
        let review = Review { actor: Actor::Expiry, reviewer: None, note: None };
        match apply_transition(&app_state.db_pool, &app_state.hub, &request, Transition::Reject, review).await {
            Ok(updated) => expired.push(updated),
            Err(e) => tracing::debug!(request_id = %request.id, error = %e, "skipped expiring request"),
        }
    }
    Ok(expired)
}
