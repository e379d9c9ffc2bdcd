/// Application name
pub const APP_NAME: &str = "Chirp";

/// Base reconnect backoff in milliseconds (doubled per attempt)
pub const BACKOFF_BASE_MS: u64 = 2_000;

/// Upper bound for a single reconnect backoff in milliseconds
pub const BACKOFF_MAX_MS: u64 = 30_000;

/// Default WebSocket keepalive ping interval in seconds
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 20;

/// Default WebSocket connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// How long a shared stream keeps its upstream alive without subscribers
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Default chat server endpoints (local development)
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws/chat";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api";

/// Envelope type tags
pub const TAG_NEW_MESSAGE: &str = "NEW_MESSAGE";
pub const TAG_MESSAGE_DELETED: &str = "MESSAGE_DELETED";
pub const TAG_PROFILE_PICTURE_UPDATED: &str = "PROFILE_PICTURE_UPDATED";
pub const TAG_CHAT_PARTICIPANTS_CHANGED: &str = "CHAT_PARTICIPANTS_CHANGED";
