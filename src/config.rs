//! Server configuration, read from the environment (and `.env`) at startup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,

    /// `tracing` filter, e.g. `"info"` or `"petchat=debug,tower_http=warn"`.
    pub log_level: String,
    pub log_json: bool,

    /// Handles that get the admin role when their account is first created.
    pub admin_handles: Vec<String>,

    /// Pending requests older than this are auto-rejected. `None` disables the sweeper.
    pub pending_ttl: Option<Duration>,
    pub sweep_interval: Duration,

    /// How often push sockets send a `heartbeat` envelope.
    pub heartbeat_interval: Duration,
    pub session_idle: time::Duration,

    /// Per-topic broadcast buffer; slower subscribers see a `lagged` error.
    pub hub_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("PETCHAT_BIND", "0.0.0.0:8080"),
            database_url: env_or("DATABASE_URL", "sqlite://petchat.db?mode=rwc"),
            log_level: env_or("PETCHAT_LOG", "info"),
            log_json: dotenv::var("PETCHAT_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            admin_handles: parse_list(&env_or("PETCHAT_ADMINS", "")),
            pending_ttl: dotenv::var("PETCHAT_PENDING_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            sweep_interval: Duration::from_secs(parse_env("PETCHAT_SWEEP_SECS", 60)),
            heartbeat_interval: Duration::from_secs(parse_env("PETCHAT_HEARTBEAT_SECS", 25)),
            session_idle: time::Duration::minutes(parse_env("PETCHAT_SESSION_IDLE_MINS", 60)),
            hub_capacity: parse_env("PETCHAT_HUB_CAPACITY", 256),
        }
    }

    pub fn is_admin_handle(&self, handle: &str) -> bool {
        self.admin_handles.iter().any(|h| h.eq_ignore_ascii_case(handle))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_owned(),
            database_url: "sqlite::memory:".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
            admin_handles: Vec::new(),
            pending_ttl: None,
            sweep_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(25),
            session_idle: time::Duration::minutes(60),
            hub_capacity: 256,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    dotenv::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    dotenv::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_list_ignores_blanks_and_case() {
        let config = Config {
            admin_handles: parse_list(" alice, ,Bob ,"),
            ..Config::default()
        };
        assert_eq!(config.admin_handles, vec!["alice", "Bob"]);
        assert!(config.is_admin_handle("bob"));
        assert!(!config.is_admin_handle("carol"));
    }
}
