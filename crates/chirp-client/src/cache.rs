//! Local cache seam used by the sync pipeline, and its SQLite adapter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chirp_store::{
    Chat, ChatMessage, ChatParticipant, ChatWithParticipants, Database, DeliveryStatus,
    ParticipantSyncPlan, StoreError,
};

/// Operations the reconciler and the sender need from the local cache.
///
/// Calls are synchronous and short; implementations must not block on
/// network I/O.
pub trait ChatCache: Send + Sync + 'static {
    fn upsert_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Deleting an unknown id is not an error.
    fn delete_message_by_id(&self, id: &str) -> Result<bool, StoreError>;

    fn get_message_by_id(&self, id: &str) -> Result<Option<ChatMessage>, StoreError>;

    fn get_chat_by_id(&self, id: &str) -> Result<Option<Chat>, StoreError>;

    fn update_profile_picture_url(&self, user_id: &str, url: Option<&str>)
        -> Result<bool, StoreError>;

    fn sync_chat_participants(
        &self,
        chat_id: &str,
        participants: &[ChatParticipant],
    ) -> Result<ParticipantSyncPlan, StoreError>;

    /// Store a server snapshot: chat row, profiles and membership, atomically.
    fn save_chat(&self, chat: &ChatWithParticipants) -> Result<(), StoreError>;

    fn update_delivery_status(&self, id: &str, status: DeliveryStatus) -> Result<bool, StoreError>;
}

/// [`ChatCache`] backed by the on-device SQLite database.
#[derive(Clone)]
pub struct SqliteChatCache {
    db: Arc<Mutex<Database>>,
}

impl SqliteChatCache {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Shared handle, e.g. for the session storage.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChatCache for SqliteChatCache {
    fn upsert_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.db().upsert_message(message)
    }

    fn delete_message_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.db().delete_message_by_id(id)
    }

    fn get_message_by_id(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
        self.db().get_message_by_id(id)
    }

    fn get_chat_by_id(&self, id: &str) -> Result<Option<Chat>, StoreError> {
        self.db().get_chat_by_id(id)
    }

    fn update_profile_picture_url(
        &self,
        user_id: &str,
        url: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.db().update_profile_picture_url(user_id, url)
    }

    fn sync_chat_participants(
        &self,
        chat_id: &str,
        participants: &[ChatParticipant],
    ) -> Result<ParticipantSyncPlan, StoreError> {
        self.db().sync_chat_participants(chat_id, participants)
    }

    fn save_chat(&self, chat: &ChatWithParticipants) -> Result<(), StoreError> {
        self.db()
            .save_chat_with_participants(&chat.chat, &chat.participants)
            .map(|_| ())
    }

    fn update_delivery_status(&self, id: &str, status: DeliveryStatus) -> Result<bool, StoreError> {
        self.db().update_delivery_status(id, status)
    }
}
