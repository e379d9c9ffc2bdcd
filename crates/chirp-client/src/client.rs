//! The real-time chat pipeline.
//!
//! Inbound frames from the connector are parsed, decoded and reconciled into
//! the local cache one at a time. Messages confirmed by the cache are
//! published on a shared stream that keeps the socket open while anyone is
//! listening.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chirp_net::{Publisher, SharedStream, SharingConfig, Subscription, WebSocketConnector};
use chirp_shared::protocol::SendMessage;
use chirp_shared::{decode, ChatEnvelope, ConnectionState, OutgoingEvent};
use chirp_store::{ChatMessage, DeliveryStatus};

use crate::cache::{ChatCache, SqliteChatCache};
use crate::error::{SendError, SyncError};
use crate::reconciler::EventReconciler;
use crate::repository::{ChatRepository, HttpChatRepository};
use crate::session::{SessionStorage, SqliteSessionStorage};

/// Failures kept for slow observers before they start lagging.
const FAILURE_BUFFER: usize = 64;

pub struct ChatConnectionClient<
    C = SqliteChatCache,
    R = HttpChatRepository<SqliteChatCache>,
    S = SqliteSessionStorage,
> {
    connector: Arc<WebSocketConnector>,
    cache: Arc<C>,
    session: Arc<S>,
    messages: SharedStream<ChatMessage>,
    failures: broadcast::Sender<Arc<SyncError>>,
    _repository: std::marker::PhantomData<fn() -> R>,
}

impl<C, R, S> ChatConnectionClient<C, R, S>
where
    C: ChatCache,
    R: ChatRepository,
    S: SessionStorage,
{
    pub fn new(
        connector: Arc<WebSocketConnector>,
        cache: Arc<C>,
        repository: Arc<R>,
        session: Arc<S>,
        sharing: SharingConfig,
    ) -> Self {
        if let Some(auth) = session.current() {
            connector.set_auth_token(Some(auth.access_token));
        }

        let reconciler = Arc::new(EventReconciler::new(
            cache.clone(),
            repository,
            session.clone(),
        ));
        let (failures, _) = broadcast::channel(FAILURE_BUFFER);

        let pipeline = Pipeline {
            connector: connector.clone(),
            reconciler,
            failures: failures.clone(),
            auth: session.observe_auth_info(),
        };
        let messages = SharedStream::new("chat-messages", sharing, move |publisher| {
            pipeline.clone().run(publisher)
        });

        Self {
            connector,
            cache,
            session,
            messages,
            failures,
            _repository: std::marker::PhantomData,
        }
    }

    /// Confirmed messages, in arrival order. Subscribing opens the socket.
    pub fn chat_messages(&self) -> Subscription<ChatMessage> {
        self.messages.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connector.connection_state()
    }

    /// Frames that could not be decoded or applied. The pipeline keeps
    /// running after each one.
    pub fn failures(&self) -> broadcast::Receiver<Arc<SyncError>> {
        self.failures.subscribe()
    }

    /// Skip the backoff before the next reconnect attempt.
    pub fn reconnect_now(&self) {
        info!("Reconnect requested");
        self.connector.retry_handler().reset_delay();
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    /// Store a PENDING message locally and send it. The server's echo
    /// confirms it; a transport failure marks it FAILED.
    pub async fn send_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, SendError> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            delivery_status: DeliveryStatus::Pending,
        };
        self.cache.upsert_message(&message)?;

        let frame = OutgoingEvent::NewMessage(SendMessage {
            chat_id: message.chat_id.clone(),
            message_id: message.id.clone(),
            content: message.content.clone(),
        })
        .to_envelope()
        .and_then(|envelope| envelope.to_frame());

        let result = match frame {
            Ok(frame) => self.connector.send(frame).await.map_err(SendError::from),
            Err(e) => Err(SendError::from(e)),
        };

        if let Err(e) = result {
            warn!(message = %message.id, chat = %chat_id, error = %e, "Send failed");
            self.cache
                .update_delivery_status(&message.id, DeliveryStatus::Failed)?;
            return Err(e);
        }

        debug!(message = %message.id, chat = %chat_id, "Message sent");
        Ok(message)
    }
}

/// Everything the upstream task needs, cloned for each run.
struct Pipeline<C, R, S> {
    connector: Arc<WebSocketConnector>,
    reconciler: Arc<EventReconciler<C, R, S>>,
    failures: broadcast::Sender<Arc<SyncError>>,
    auth: watch::Receiver<Option<chirp_shared::AuthInfo>>,
}

impl<C, R, S> Clone for Pipeline<C, R, S> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            reconciler: self.reconciler.clone(),
            failures: self.failures.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl<C, R, S> Pipeline<C, R, S>
where
    C: ChatCache,
    R: ChatRepository,
    S: SessionStorage,
{
    async fn run(mut self, publisher: Publisher<ChatMessage>) {
        let mut frames = self.connector.messages().subscribe();
        let mut auth_open = true;
        debug!("Chat pipeline started");

        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        info!("Transport stream ended");
                        return;
                    };
                    match self.process(&frame).await {
                        Ok(Some(message)) => {
                            if !publisher.emit(message).await {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Failed to process frame");
                            let _ = self.failures.send(Arc::new(e));
                        }
                    }
                }

                changed = self.auth.changed(), if auth_open => {
                    if changed.is_err() {
                        auth_open = false;
                        continue;
                    }
                    let token = self.auth.borrow_and_update().as_ref().map(|a| a.access_token.clone());
                    debug!(signed_in = token.is_some(), "Session changed, updating token");
                    self.connector.set_auth_token(token);
                }
            }
        }
    }

    async fn process(&self, frame: &str) -> Result<Option<ChatMessage>, SyncError> {
        let envelope = ChatEnvelope::from_frame(frame)?;
        match decode(&envelope)? {
            Some(event) => {
                debug!(kind = event.tag(), "Handling event");
                self.reconciler.handle(event).await
            }
            None => {
                debug!(kind = %envelope.kind, "Ignoring unknown event");
                Ok(None)
            }
        }
    }
}
