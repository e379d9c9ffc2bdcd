//! Remote chat snapshots over the REST API.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

use chirp_shared::AuthInfo;
use chirp_store::{Chat, ChatParticipant, ChatWithParticipants};

use crate::cache::ChatCache;
use crate::error::FetchError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub trait ChatRepository: Send + Sync + 'static {
    /// Fetch the server's view of a chat and write it to the local cache.
    fn fetch_chat_by_id(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<ChatWithParticipants, FetchError>> + Send;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDto {
    pub id: String,
    #[serde(default)]
    pub participants: Vec<ChatParticipantDto>,
    pub last_activity_at: DateTime<Utc>,
    pub last_message: Option<LastMessageDto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatParticipantDto {
    pub user_id: String,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

/// Only the preview text is cached; the rest of the message is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct LastMessageDto {
    pub content: String,
}

impl From<ChatDto> for ChatWithParticipants {
    fn from(dto: ChatDto) -> Self {
        Self {
            chat: Chat {
                id: dto.id,
                last_activity_at: dto.last_activity_at,
                last_message: dto.last_message.map(|m| m.content),
            },
            participants: dto
                .participants
                .into_iter()
                .map(|p| ChatParticipant {
                    user_id: p.user_id,
                    username: p.username,
                    profile_picture_url: p.profile_picture_url,
                })
                .collect(),
        }
    }
}

/// [`ChatRepository`] talking to `GET {api_url}/chat/{id}`.
pub struct HttpChatRepository<C> {
    http: Client,
    api_url: String,
    cache: Arc<C>,
    auth: watch::Receiver<Option<AuthInfo>>,
    fallback_token: Option<String>,
}

impl<C: ChatCache> HttpChatRepository<C> {
    /// `auth` supplies the bearer token; `fallback_token` is used while no
    /// session is stored.
    pub fn new(
        api_url: impl Into<String>,
        cache: Arc<C>,
        auth: watch::Receiver<Option<AuthInfo>>,
        fallback_token: Option<String>,
    ) -> Result<Self, FetchError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            cache,
            auth,
            fallback_token,
        })
    }

    fn token(&self) -> Option<String> {
        self.auth
            .borrow()
            .as_ref()
            .map(|a| a.access_token.clone())
            .or_else(|| self.fallback_token.clone())
    }
}

impl<C: ChatCache> ChatRepository for HttpChatRepository<C> {
    async fn fetch_chat_by_id(&self, chat_id: &str) -> Result<ChatWithParticipants, FetchError> {
        let url = format!("{}/chat/{}", self.api_url, chat_id);
        let mut request = self.http.get(&url);
        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(chat_id.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let chat: ChatWithParticipants = response.json::<ChatDto>().await?.into();
        self.cache.save_chat(&chat)?;

        debug!(
            chat = %chat.chat.id,
            participants = chat.participants.len(),
            "Fetched chat"
        );
        Ok(chat)
    }
}
