use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{
    TAG_CHAT_PARTICIPANTS_CHANGED, TAG_MESSAGE_DELETED, TAG_NEW_MESSAGE,
    TAG_PROFILE_PICTURE_UPDATED,
};
use crate::error::DecodeError;

/// Wire-level wrapper around every frame exchanged with the chat server.
///
/// `payload` is itself a JSON document, carried as an opaque string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: String,
}

impl ChatEnvelope {
    /// Parse a text frame into an envelope without looking at the payload.
    pub fn from_frame(frame: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(frame).map_err(DecodeError::Envelope)
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A new or re-delivered chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePictureUpdated {
    pub user_id: String,
    pub new_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatParticipantsChanged {
    pub chat_id: String,
}

/// Typed event decoded from an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingEvent {
    NewMessage(NewMessage),
    MessageDeleted(MessageDeleted),
    ProfilePictureUpdated(ProfilePictureUpdated),
    ChatParticipantsChanged(ChatParticipantsChanged),
}

impl IncomingEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => TAG_NEW_MESSAGE,
            Self::MessageDeleted(_) => TAG_MESSAGE_DELETED,
            Self::ProfilePictureUpdated(_) => TAG_PROFILE_PICTURE_UPDATED,
            Self::ChatParticipantsChanged(_) => TAG_CHAT_PARTICIPANTS_CHANGED,
        }
    }
}

/// Decode an envelope into a typed event.
///
/// Returns `Ok(None)` for tags this client does not know about, so newer
/// servers can add event kinds without breaking older clients.
pub fn decode(envelope: &ChatEnvelope) -> Result<Option<IncomingEvent>, DecodeError> {
    let event = match envelope.kind.as_str() {
        TAG_NEW_MESSAGE => {
            IncomingEvent::NewMessage(payload(TAG_NEW_MESSAGE, &envelope.payload)?)
        }
        TAG_MESSAGE_DELETED => {
            IncomingEvent::MessageDeleted(payload(TAG_MESSAGE_DELETED, &envelope.payload)?)
        }
        TAG_PROFILE_PICTURE_UPDATED => IncomingEvent::ProfilePictureUpdated(payload(
            TAG_PROFILE_PICTURE_UPDATED,
            &envelope.payload,
        )?),
        TAG_CHAT_PARTICIPANTS_CHANGED => IncomingEvent::ChatParticipantsChanged(payload(
            TAG_CHAT_PARTICIPANTS_CHANGED,
            &envelope.payload,
        )?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn payload<T: DeserializeOwned>(tag: &'static str, raw: &str) -> Result<T, DecodeError> {
    serde_json::from_str(raw).map_err(|source| DecodeError::Payload { tag, source })
}

/// Outbound message sent by this client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub chat_id: String,
    pub message_id: String,
    pub content: String,
}

/// Events this client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingEvent {
    NewMessage(SendMessage),
}

impl OutgoingEvent {
    pub fn to_envelope(&self) -> Result<ChatEnvelope, DecodeError> {
        match self {
            Self::NewMessage(msg) => Ok(ChatEnvelope {
                kind: TAG_NEW_MESSAGE.to_string(),
                payload: serde_json::to_string(msg)?,
            }),
        }
    }
}
