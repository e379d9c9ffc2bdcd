use thiserror::Error;

use chirp_net::ConnectionError;
use chirp_shared::DecodeError;
use chirp_store::StoreError;

/// Failure to fetch a chat snapshot from the REST API.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chat {0} not found on server")]
    NotFound(String),

    #[error("Server answered HTTP {0}")]
    Status(u16),

    #[error("Cache error: {0}")]
    Store(#[from] StoreError),
}

/// Failure while turning an inbound frame into cache state.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Encode error: {0}")]
    Encode(#[from] DecodeError),

    #[error("Cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] ConnectionError),
}
