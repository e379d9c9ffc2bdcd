//! Client configuration loaded from environment variables.
//!
//! Every setting has a default pointing at a local development server, so
//! the sync daemon starts with zero configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chirp_net::{ConnectorConfig, SharingConfig};
use chirp_shared::constants::{
    DEFAULT_API_URL, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PING_INTERVAL_SECS,
    DEFAULT_STOP_TIMEOUT_MS, DEFAULT_WS_URL,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint for real-time events.
    /// Env: `CHIRP_WS_URL`
    pub ws_url: String,

    /// Base URL of the REST API (no trailing slash).
    /// Env: `CHIRP_API_URL`
    pub api_url: String,

    /// SQLite cache location.
    /// Env: `CHIRP_DB_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Bearer token used when no session is stored yet.
    /// Env: `CHIRP_ACCESS_TOKEN`
    pub access_token: Option<String>,

    /// Env: `CHIRP_CONNECT_TIMEOUT_SECS`
    pub connect_timeout: Duration,

    /// Env: `CHIRP_PING_INTERVAL_SECS`
    pub ping_interval: Duration,

    /// How long shared streams outlive their last subscriber.
    /// Env: `CHIRP_STOP_TIMEOUT_MS`
    pub stop_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            db_path: None,
            access_token: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CHIRP_WS_URL") {
            config.ws_url = url;
        }

        if let Some(url) = lookup("CHIRP_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(path) = lookup("CHIRP_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(token) = lookup("CHIRP_ACCESS_TOKEN").filter(|t| !t.is_empty()) {
            config.access_token = Some(token);
        }

        if let Some(secs) = parse_var::<u64, _>(&lookup, "CHIRP_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(secs);
        }

        // A zero period would make the ping interval panic.
        if let Some(secs) = parse_var::<u64, _>(&lookup, "CHIRP_PING_INTERVAL_SECS") {
            if secs > 0 {
                config.ping_interval = Duration::from_secs(secs);
            } else {
                tracing::warn!("CHIRP_PING_INTERVAL_SECS must be positive, using default");
            }
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "CHIRP_STOP_TIMEOUT_MS") {
            config.stop_timeout = Duration::from_millis(ms);
        }

        config
    }

    /// Sharing policy for the client's shared streams.
    pub fn sharing(&self) -> SharingConfig {
        SharingConfig {
            stop_timeout: self.stop_timeout,
            ..SharingConfig::default()
        }
    }

    pub fn connector_config(&self, auth_token: Option<String>) -> ConnectorConfig {
        ConnectorConfig {
            url: self.ws_url.clone(),
            auth_token: auth_token.or_else(|| self.access_token.clone()),
            connect_timeout: self.connect_timeout,
            ping_interval: self.ping_interval,
            sharing: self.sharing(),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let config = config_from(&[]);
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert!(config.db_path.is_none());
        assert!(config.access_token.is_none());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.stop_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn overrides_apply() {
        let config = config_from(&[
            ("CHIRP_WS_URL", "wss://chat.example.com/ws/chat"),
            ("CHIRP_API_URL", "https://chat.example.com/api/"),
            ("CHIRP_DB_PATH", "/tmp/chirp.db"),
            ("CHIRP_ACCESS_TOKEN", "tok"),
            ("CHIRP_CONNECT_TIMEOUT_SECS", "3"),
            ("CHIRP_STOP_TIMEOUT_MS", "0"),
        ]);
        assert_eq!(config.ws_url, "wss://chat.example.com/ws/chat");
        assert_eq!(config.api_url, "https://chat.example.com/api");
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/chirp.db")));
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert!(config.sharing().stop_timeout.is_zero());
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = config_from(&[
            ("CHIRP_CONNECT_TIMEOUT_SECS", "soon"),
            ("CHIRP_PING_INTERVAL_SECS", "0"),
            ("CHIRP_STOP_TIMEOUT_MS", "-1"),
        ]);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ping_interval, Duration::from_secs(20));
        assert_eq!(config.stop_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn stored_token_wins_over_env_token() {
        let config = config_from(&[("CHIRP_ACCESS_TOKEN", "env")]);
        assert_eq!(
            config.connector_config(Some("stored".into())).auth_token.as_deref(),
            Some("stored")
        );
        assert_eq!(config.connector_config(None).auth_token.as_deref(), Some("env"));
    }
}
