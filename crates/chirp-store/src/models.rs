//! Domain model structs persisted in the local cache.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A conversation as last seen from the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    /// Server-assigned chat identifier.
    pub id: String,
    /// Time of the most recent activity in the chat.
    pub last_activity_at: DateTime<Utc>,
    /// Preview text of the most recent message, if any.
    pub last_message: Option<String>,
}

/// A chat together with its currently active participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatWithParticipants {
    pub chat: Chat,
    pub participants: Vec<ChatParticipant>,
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// Profile of a user that takes part in at least one chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatParticipant {
    pub user_id: String,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

/// Membership of one user in one chat.  Inactive rows are kept as history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatParticipantCrossRef {
    pub chat_id: String,
    pub user_id: String,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Delivery state of a cached message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Written locally, not yet confirmed by the server.
    Pending,
    /// Confirmed by the server.
    Sent,
    /// The send attempt failed.
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown delivery status: {0}")]
pub struct UnknownDeliveryStatus(pub String);

impl FromStr for DeliveryStatus {
    type Err = UnknownDeliveryStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            other => Err(UnknownDeliveryStatus(other.to_string())),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Unique message identifier (server-assigned, or generated locally for
    /// an optimistic send and echoed back by the server).
    pub id: String,
    /// The chat this message belongs to.
    pub chat_id: String,
    /// User id of the author.
    pub sender_id: String,
    /// Plain-text body.
    pub content: String,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_text_form() {
        for status in [DeliveryStatus::Pending, DeliveryStatus::Sent, DeliveryStatus::Failed] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>().unwrap(), status);
        }
        assert!("DELIVERED".parse::<DeliveryStatus>().is_err());
    }
}
