use thiserror::Error;

/// Failure to turn an inbound frame into a typed event.
///
/// Unknown envelope tags are not errors; only frames that claim a known
/// shape and fail to match it end up here.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Malformed {tag} payload: {source}")]
    Payload {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
