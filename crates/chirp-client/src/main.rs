//! # chirp-sync
//!
//! Headless sync daemon: keeps the local cache in step with the chat server
//! and logs every confirmed message until interrupted.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use chirp_client::{
    init_tracing, ChatConnectionClient, ClientConfig, HttpChatRepository, SessionStorage,
    SqliteChatCache, SqliteSessionStorage,
};
use chirp_net::{ConnectionRetryHandler, WebSocketConnector};
use chirp_shared::constants::APP_NAME;
use chirp_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Starting {} sync daemon v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(
        ws = %config.ws_url,
        api = %config.api_url,
        has_token = config.access_token.is_some(),
        "Loaded configuration"
    );

    let database = match &config.db_path {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("Failed to open local cache")?;
    let database = Arc::new(Mutex::new(database));

    let cache = Arc::new(SqliteChatCache::new(database.clone()));
    let session = Arc::new(
        SqliteSessionStorage::new(database).context("Failed to load stored session")?,
    );
    let repository = Arc::new(
        HttpChatRepository::new(
            config.api_url.clone(),
            cache.clone(),
            session.observe_auth_info(),
            config.access_token.clone(),
        )
        .context("Failed to build HTTP client")?,
    );

    let stored_token = session.current().map(|auth| auth.access_token);
    if stored_token.is_none() && config.access_token.is_none() {
        warn!("No session stored and CHIRP_ACCESS_TOKEN unset, connecting anonymously");
    }
    let connector = Arc::new(WebSocketConnector::new(
        config.connector_config(stored_token),
        Arc::new(ConnectionRetryHandler::new()),
    ));

    let client: ChatConnectionClient = ChatConnectionClient::new(
        connector,
        cache,
        repository,
        session,
        config.sharing(),
    );

    let mut messages = client.chat_messages();
    let mut failures = client.failures();
    let mut state = client.connection_state();

    loop {
        tokio::select! {
            message = messages.recv() => {
                let Some(message) = message else {
                    error!("Connection closed permanently");
                    anyhow::bail!("chat connection terminated");
                };
                info!(
                    chat = %message.chat_id,
                    message = %message.id,
                    sender = %message.sender_id,
                    "Message synced"
                );
            }

            failure = failures.recv() => match failure {
                Ok(e) => warn!(error = %e, "Sync failure"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed sync failures"),
                Err(RecvError::Closed) => {}
            },

            changed = state.changed() => {
                if changed.is_ok() {
                    info!(state = %*state.borrow_and_update(), "Connection state");
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    Ok(())
}
