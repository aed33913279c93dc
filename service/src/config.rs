use clap::builder::TypedValueParser as _;
use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use log::LevelFilter;
use std::time::Duration;

/// Backend origin used when neither `VITE_API_BASE_URL` nor `VITE_API_URL` is set.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";

/// Path prefix the backend mounts its REST API and sync stream under.
pub const DEFAULT_API_PREFIX: &str = "/api";

/// Path of the Server-Sent Events stream, relative to the API root.
pub const SYNC_EVENTS_PATH: &str = "/sync/events";

/// What the binary does once the service is wired up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SyncMode {
    /// Stay connected to the event stream and log every change until interrupted
    Watch,
    /// Pull the current month's data once and print it as JSON
    Poll,
    /// Ask the backend to push a full sync, pulling instead if that request fails
    ForceSync,
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Origin of the gestion-ventes backend (REST API and sync event stream).
    #[arg(long, env = "VITE_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Legacy name of the backend origin, only consulted when VITE_API_BASE_URL is unset.
    #[arg(long, env = "VITE_API_URL")]
    legacy_api_url: Option<String>,

    /// Path prefix under which the backend exposes its API.
    #[arg(long, env, default_value = DEFAULT_API_PREFIX)]
    api_prefix: String,

    /// Bearer token sent with REST requests and the event stream request.
    #[arg(long, env, hide_env_values = true)]
    api_token: Option<String>,

    /// Base delay in milliseconds before the first reconnect attempt.
    #[arg(long, env, default_value_t = 3000)]
    pub reconnect_interval_ms: u64,

    /// Reconnect attempts allowed after a connection error before giving up.
    #[arg(long, env, default_value_t = 5)]
    pub max_reconnect_attempts: u32,

    /// Upper bound in milliseconds for the delay between reconnect attempts.
    #[arg(long, env, default_value_t = 30000)]
    pub max_reconnect_delay_ms: u64,

    /// Timeout in seconds for establishing the event stream connection
    #[arg(long, env, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Timeout in seconds for each REST request
    #[arg(long, env, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Retries for REST GET requests that fail with transient errors
    #[arg(long, env, default_value_t = 3)]
    pub http_max_retries: u32,

    /// Once reconnects are exhausted, pull the month's data every N seconds (0 disables polling).
    #[arg(long, env, default_value_t = 0)]
    pub fallback_poll_interval_secs: u64,

    /// Pull the month's data after the stream reopens, to catch up on events missed while disconnected.
    #[arg(long, env)]
    pub resync_on_reconnect: bool,

    /// What to do once connected.
    #[arg(short = 'm', long, env, value_enum, default_value_t = SyncMode::Watch)]
    pub sync_mode: SyncMode,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    /// Backend origin without a trailing slash. `VITE_API_BASE_URL` wins over
    /// the legacy `VITE_API_URL`; blank values count as unset.
    pub fn api_base_url(&self) -> &str {
        [&self.api_base_url, &self.legacy_api_url]
            .into_iter()
            .flatten()
            .map(|url| url.trim())
            .find(|url| !url.is_empty())
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn set_api_base_url(mut self, api_base_url: String) -> Self {
        self.api_base_url = Some(api_base_url);
        self
    }

    /// Normalized API prefix: either empty or a single leading slash with no trailing slash.
    pub fn api_prefix(&self) -> String {
        let trimmed = self.api_prefix.trim().trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Root URL that REST endpoint paths are appended to, e.g. `http://host/api`.
    pub fn api_root(&self) -> String {
        format!("{}{}", self.api_base_url(), self.api_prefix())
    }

    /// Full URL of the Server-Sent Events stream.
    pub fn sync_events_url(&self) -> String {
        format!("{}{}", self.api_root(), SYNC_EVENTS_PATH)
    }

    pub fn api_token(&self) -> Option<&str> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn fallback_poll_interval(&self) -> Option<Duration> {
        (self.fallback_poll_interval_secs > 0)
            .then(|| Duration::from_secs(self.fallback_poll_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const BIN: &str = "gestion_ventes_sync";

    fn clear_backend_env() {
        for key in ["VITE_API_BASE_URL", "VITE_API_URL", "API_PREFIX", "API_TOKEN"] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_backend_env();
        let config = Config::parse_from([BIN]);

        assert_eq!(config.api_base_url(), DEFAULT_API_BASE_URL);
        assert_eq!(config.api_root(), "http://localhost:3000/api");
        assert_eq!(
            config.sync_events_url(),
            "http://localhost:3000/api/sync/events"
        );
        assert_eq!(config.reconnect_interval(), Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.max_reconnect_delay(), Duration::from_secs(30));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.fallback_poll_interval(), None);
        assert!(!config.resync_on_reconnect);
        assert_eq!(config.sync_mode, SyncMode::Watch);
        assert_eq!(config.log_level_filter, LevelFilter::Info);
        assert_eq!(config.api_token(), None);
    }

    #[test]
    #[serial]
    fn test_legacy_url_used_when_base_url_missing() {
        clear_backend_env();
        let config = Config::parse_from([BIN, "--legacy-api-url", "https://legacy.example.com/"]);
        assert_eq!(config.api_base_url(), "https://legacy.example.com");
    }

    #[test]
    #[serial]
    fn test_base_url_preferred_over_legacy_url() {
        clear_backend_env();
        let config = Config::parse_from([
            BIN,
            "--api-base-url",
            "https://ventes.example.com",
            "--legacy-api-url",
            "https://legacy.example.com",
        ]);
        assert_eq!(config.api_base_url(), "https://ventes.example.com");
    }

    #[test]
    #[serial]
    fn test_blank_base_url_falls_through() {
        clear_backend_env();
        let config = Config::parse_from([
            BIN,
            "--api-base-url",
            "  ",
            "--legacy-api-url",
            "https://legacy.example.com",
        ]);
        assert_eq!(config.api_base_url(), "https://legacy.example.com");
    }

    #[test]
    #[serial]
    fn test_base_url_read_from_environment() {
        clear_backend_env();
        env::set_var("VITE_API_URL", "https://legacy.example.com");
        env::set_var("VITE_API_BASE_URL", "https://env.example.com/");
        let config = Config::parse_from([BIN]);
        clear_backend_env();

        assert_eq!(config.api_base_url(), "https://env.example.com");
    }

    #[test]
    #[serial]
    fn test_api_prefix_normalization() {
        clear_backend_env();
        for (raw, expected) in [("api", "/api"), ("/api/", "/api"), ("/", ""), ("", "")] {
            let config = Config::parse_from([BIN, "--api-prefix", raw]);
            assert_eq!(config.api_prefix(), expected, "prefix {raw:?}");
        }

        let config = Config::parse_from([BIN, "--api-prefix", "/"])
            .set_api_base_url("https://ventes.example.com".to_string());
        assert_eq!(
            config.sync_events_url(),
            "https://ventes.example.com/sync/events"
        );
    }

    #[test]
    #[serial]
    fn test_blank_token_is_ignored() {
        clear_backend_env();
        let config = Config::parse_from([BIN, "--api-token", " "]);
        assert_eq!(config.api_token(), None);

        let config = Config::parse_from([BIN, "--api-token", "secret"]);
        assert_eq!(config.api_token(), Some("secret"));
    }

    #[test]
    #[serial]
    fn test_sync_mode_and_poll_interval_flags() {
        clear_backend_env();
        let config = Config::parse_from([
            BIN,
            "--sync-mode",
            "force-sync",
            "--fallback-poll-interval-secs",
            "60",
            "--resync-on-reconnect",
        ]);

        assert_eq!(config.sync_mode, SyncMode::ForceSync);
        assert_eq!(config.fallback_poll_interval(), Some(Duration::from_secs(60)));
        assert!(config.resync_on_reconnect);
    }

    #[test]
    #[serial]
    fn test_invalid_log_level_is_rejected() {
        clear_backend_env();
        assert!(Config::try_parse_from([BIN, "--log-level-filter", "LOUD"]).is_err());
        let config = Config::try_parse_from([BIN, "-l", "DEBUG"]).unwrap();
        assert_eq!(config.log_level_filter, LevelFilter::Debug);
    }
}
