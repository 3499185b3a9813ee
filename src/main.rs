use std::net::SocketAddr;

use petchat::{app, db, requests, AppState, Config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::from_env();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|e| {
            eprintln!("WARN: PETCHAT_LOG='{}' is not a valid filter ({e}); using 'info'", config.log_level);
            EnvFilter::new("info")
        });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "petchat starting");

    let db_pool = db::connect(&config.database_url).await?;
    info!(database_url = %config.database_url, "database ready");

    let addr: SocketAddr = config.bind_address.parse()?;
    let app_state = AppState::new(db_pool, config);
    app_state.spawn_janitor(app_state.config.sweep_interval);

    if let Some(ttl) = app_state.config.pending_ttl {
        requests::expire::spawn_sweeper(app_state.clone(), ttl, app_state.config.sweep_interval);
        info!(ttl_secs = ttl.as_secs(), "pending request sweeper enabled");
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("petchat stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => { s.recv().await; }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
