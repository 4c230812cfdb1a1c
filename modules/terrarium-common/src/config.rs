use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Background loops
    pub outbox_poll_secs: u64,
    pub projector_poll_secs: u64,

    // Session grouping
    pub session_gap_secs: i64,

    // Chronicle read API
    pub chronicle_page_cap: u32,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("WEB_PORT must be a number"),
            outbox_poll_secs: parse_env_or("OUTBOX_POLL_SECS", 2),
            projector_poll_secs: parse_env_or("PROJECTOR_POLL_SECS", 1),
            session_gap_secs: parse_env_or("SESSION_GAP_SECS", 900),
            chronicle_page_cap: parse_env_or("CHRONICLE_PAGE_CAP", 100),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
