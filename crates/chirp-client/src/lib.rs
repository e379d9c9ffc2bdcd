//! # chirp-client
//!
//! Real-time synchronization core of the Chirp chat client: keeps the local
//! SQLite cache in step with the server over a WebSocket connection.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod navigation;
pub mod reconciler;
pub mod repository;
pub mod session;

use tracing_subscriber::{fmt, EnvFilter};

pub use cache::{ChatCache, SqliteChatCache};
pub use client::ChatConnectionClient;
pub use config::ClientConfig;
pub use error::{FetchError, SendError, SyncError};
pub use navigation::{ExternalUriQueue, NavigationController};
pub use reconciler::EventReconciler;
pub use repository::{ChatRepository, HttpChatRepository};
pub use session::{SessionStorage, SqliteSessionStorage};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("chirp_client=debug,chirp_net=debug,chirp_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
