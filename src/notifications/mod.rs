//! Per-user lifecycle events: `chat.request` to admins, `chat.admin_approved`
//! to the target, `chat.user_accepted` and `chat.rejected` to the requester.
//!
//! Best-effort, at-most-once per open connection. Nothing is queued for
//! offline users; a reconnecting client catches up by listing its requests.

mod ws;

use axum::{routing::get, Router};
use serde_json::json;
use uuid::Uuid;

use crate::{events::{Envelope, EventKind}, hub::{self, StreamHub}, requests::ChatRequest, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::notifications_ws))
        .route("/events", get(ws::notification_events))
}

pub async fn to_user(hub: &StreamHub, user_id: Uuid, envelope: Envelope) {
    let kind = envelope.kind;
    let delivered = hub.publish(&hub::user_topic(user_id), envelope).await;
    tracing::debug!(%user_id, %kind, delivered, "notification sent");
}

pub async fn to_admins(hub: &StreamHub, envelope: Envelope) {
    let kind = envelope.kind;
    let delivered = hub.publish(hub::ADMINS, envelope).await;
    tracing::debug!(%kind, delivered, "admin notification sent");
}

pub fn request_submitted(request: &ChatRequest) -> Envelope {
    Envelope::new(EventKind::ChatRequest, request)
}

pub fn request_approved(request: &ChatRequest) -> Envelope {
    Envelope::new(EventKind::ChatAdminApproved, request)
}

pub fn request_accepted(request: &ChatRequest, room_id: Uuid) -> Envelope {
    Envelope::new(EventKind::ChatUserAccepted, json!({
        "request_id": request.id,
        "pet_id": request.pet_id,
        "target_id": request.target_id,
        "room_id": room_id,
    }))
}

pub fn request_rejected(request: &ChatRequest) -> Envelope {
    Envelope::new(EventKind::ChatRejected, json!({
        "request_id": request.id,
        "pet_id": request.pet_id,
        "rejected_by": request.rejected_by,
        "note": request.admin_note,
    }))
}
