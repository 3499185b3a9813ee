pub mod appresult;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod events;
pub mod hub;
pub mod notifications;
pub mod pets;
mod push;
pub mod requests;
pub mod rooms;
pub mod session;

use std::{sync::Arc, time::Duration};

use axum::{extract::FromRef, routing::get, Json, Router};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tokio::task::JoinHandle;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use hub::StreamHub;
pub use rooms::RoomSequencer;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub hub: StreamHub,
    pub config: Arc<Config>,
    pub sequencer: RoomSequencer,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> Self {
        Self {
            db_pool,
            hub: StreamHub::new(config.hub_capacity),
            config: Arc::new(config),
            sequencer: RoomSequencer::default(),
        }
    }

    /// Periodically drops hub topics and room locks nobody is using.
    pub fn spawn_janitor(&self, every: Duration) -> JoinHandle<()> {
        let app_state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
            loop {
                interval.tick().await;
                app_state.hub.cleanup().await;
                app_state.sequencer.prune();
                let topics = app_state.hub.topic_count().await;
                tracing::trace!(topics, rooms = app_state.sequencer.len(), "janitor pass");
            }
        })
    }
}

pub fn app(app_state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(app_state.config.session_idle));

    Router::new()
        .route("/health", get(health))

        .merge(auth::router())
        .nest("/pets", pets::router())
        .merge(requests::router())
        .nest("/notifications", notifications::router())
        .nest("/rooms", rooms::router())

        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
