//! Applies decoded server events to the local cache.

use std::sync::Arc;

use tracing::{debug, info, warn};

use chirp_shared::protocol::{
    ChatParticipantsChanged, MessageDeleted, NewMessage, ProfilePictureUpdated,
};
use chirp_shared::IncomingEvent;
use chirp_store::{ChatMessage, DeliveryStatus};

use crate::cache::ChatCache;
use crate::error::SyncError;
use crate::repository::ChatRepository;
use crate::session::SessionStorage;

/// Runs exactly one handler per event. Callers feed events one at a time in
/// arrival order.
pub struct EventReconciler<C, R, S> {
    cache: Arc<C>,
    repository: Arc<R>,
    session: Arc<S>,
}

impl<C, R, S> EventReconciler<C, R, S>
where
    C: ChatCache,
    R: ChatRepository,
    S: SessionStorage,
{
    pub fn new(cache: Arc<C>, repository: Arc<R>, session: Arc<S>) -> Self {
        Self {
            cache,
            repository,
            session,
        }
    }

    /// Returns the stored message for `NewMessage` events, `None` otherwise.
    pub async fn handle(&self, event: IncomingEvent) -> Result<Option<ChatMessage>, SyncError> {
        match event {
            IncomingEvent::NewMessage(message) => self.on_new_message(message).await,
            IncomingEvent::MessageDeleted(deleted) => {
                self.on_message_deleted(deleted)?;
                Ok(None)
            }
            IncomingEvent::ProfilePictureUpdated(update) => {
                self.on_profile_picture_updated(update)?;
                Ok(None)
            }
            IncomingEvent::ChatParticipantsChanged(changed) => {
                self.on_participants_changed(changed).await?;
                Ok(None)
            }
        }
    }

    async fn on_new_message(&self, message: NewMessage) -> Result<Option<ChatMessage>, SyncError> {
        if self.cache.get_chat_by_id(&message.chat_id)?.is_none() {
            debug!(chat = %message.chat_id, "Message for unknown chat, fetching it");
            // The message is stored either way.
            if let Err(e) = self.repository.fetch_chat_by_id(&message.chat_id).await {
                warn!(chat = %message.chat_id, error = %e, "Failed to fetch chat");
            }
        }

        let id = message.id.clone();
        self.cache.upsert_message(&ChatMessage {
            id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            content: message.content,
            created_at: message.created_at,
            delivery_status: DeliveryStatus::Sent,
        })?;

        Ok(self.cache.get_message_by_id(&id)?)
    }

    fn on_message_deleted(&self, deleted: MessageDeleted) -> Result<(), SyncError> {
        let existed = self.cache.delete_message_by_id(&deleted.message_id)?;
        debug!(message = %deleted.message_id, existed, "Message deleted");
        Ok(())
    }

    fn on_profile_picture_updated(&self, update: ProfilePictureUpdated) -> Result<(), SyncError> {
        self.cache
            .update_profile_picture_url(&update.user_id, update.new_url.as_deref())?;

        if let Some(auth) = self.session.current() {
            if auth.user.id == update.user_id {
                info!(user = %update.user_id, "Own profile picture changed");
                self.session
                    .set(Some(auth.with_profile_picture(update.new_url)))?;
            }
        }
        Ok(())
    }

    async fn on_participants_changed(&self, changed: ChatParticipantsChanged) -> Result<(), SyncError> {
        self.repository.fetch_chat_by_id(&changed.chat_id).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use tokio::sync::watch;

    use chirp_shared::{AuthInfo, User};
    use chirp_store::{
        Chat, ChatParticipant, ChatWithParticipants, Database, ParticipantSyncPlan, StoreError,
    };

    use crate::cache::SqliteChatCache;
    use crate::error::FetchError;

    pub(crate) type CallLog = Arc<Mutex<Vec<&'static str>>>;

    /// Records calls and answers with a canned snapshot or `NotFound`.
    pub(crate) struct FakeRepository {
        pub cache: Arc<SqliteChatCache>,
        pub snapshot: Option<ChatWithParticipants>,
        pub calls: Mutex<Vec<String>>,
        pub log: CallLog,
    }

    impl FakeRepository {
        pub fn new(cache: Arc<SqliteChatCache>, snapshot: Option<ChatWithParticipants>) -> Self {
            Self {
                cache,
                snapshot,
                calls: Mutex::new(Vec::new()),
                log: CallLog::default(),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ChatRepository for FakeRepository {
        async fn fetch_chat_by_id(&self, chat_id: &str) -> Result<ChatWithParticipants, FetchError> {
            self.calls.lock().unwrap().push(chat_id.to_string());
            self.log.lock().unwrap().push("fetch");
            match &self.snapshot {
                Some(chat) if chat.chat.id == chat_id => {
                    self.cache.save_chat(chat)?;
                    Ok(chat.clone())
                }
                _ => Err(FetchError::NotFound(chat_id.to_string())),
            }
        }
    }

    pub(crate) struct MemorySession {
        state: watch::Sender<Option<AuthInfo>>,
    }

    impl MemorySession {
        pub fn new(info: Option<AuthInfo>) -> Self {
            Self {
                state: watch::channel(info).0,
            }
        }
    }

    impl SessionStorage for MemorySession {
        fn observe_auth_info(&self) -> watch::Receiver<Option<AuthInfo>> {
            self.state.subscribe()
        }

        fn set(&self, info: Option<AuthInfo>) -> Result<(), StoreError> {
            self.state.send_replace(info);
            Ok(())
        }
    }

    /// Logs message upserts into the repository's log so the two can be
    /// ordered.
    struct OrderedCache {
        inner: SqliteChatCache,
        log: CallLog,
    }

    impl ChatCache for OrderedCache {
        fn upsert_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
            self.log.lock().unwrap().push("upsert");
            self.inner.upsert_message(message)
        }
        fn delete_message_by_id(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete_message_by_id(id)
        }
        fn get_message_by_id(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
            self.inner.get_message_by_id(id)
        }
        fn get_chat_by_id(&self, id: &str) -> Result<Option<Chat>, StoreError> {
            self.inner.get_chat_by_id(id)
        }
        fn update_profile_picture_url(
            &self,
            user_id: &str,
            url: Option<&str>,
        ) -> Result<bool, StoreError> {
            self.inner.update_profile_picture_url(user_id, url)
        }
        fn sync_chat_participants(
            &self,
            chat_id: &str,
            participants: &[ChatParticipant],
        ) -> Result<ParticipantSyncPlan, StoreError> {
            self.inner.sync_chat_participants(chat_id, participants)
        }
        fn save_chat(&self, chat: &ChatWithParticipants) -> Result<(), StoreError> {
            self.inner.save_chat(chat)
        }
        fn update_delivery_status(&self, id: &str, status: DeliveryStatus) -> Result<bool, StoreError> {
            self.inner.update_delivery_status(id, status)
        }
    }

    pub(crate) fn sqlite_cache() -> Arc<SqliteChatCache> {
        Arc::new(SqliteChatCache::new(Arc::new(Mutex::new(
            Database::open_in_memory().unwrap(),
        ))))
    }

    pub(crate) fn snapshot(chat_id: &str, users: &[&str]) -> ChatWithParticipants {
        ChatWithParticipants {
            chat: Chat {
                id: chat_id.to_string(),
                last_activity_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
                last_message: None,
            },
            participants: users
                .iter()
                .map(|u| ChatParticipant {
                    user_id: u.to_string(),
                    username: u.to_string(),
                    profile_picture_url: None,
                })
                .collect(),
        }
    }

    pub(crate) fn me() -> AuthInfo {
        AuthInfo {
            access_token: "token".into(),
            refresh_token: "refresh".into(),
            user: User {
                id: "me".into(),
                email: "me@example.com".into(),
                username: "me".into(),
                has_verified_email: true,
                profile_picture_url: None,
            },
        }
    }

    fn new_message(id: &str, chat_id: &str) -> IncomingEvent {
        IncomingEvent::NewMessage(NewMessage {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: "alice".into(),
            content: "hello".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        })
    }

    type TestReconciler = EventReconciler<SqliteChatCache, FakeRepository, MemorySession>;

    fn reconciler(
        snapshot: Option<ChatWithParticipants>,
    ) -> (
        TestReconciler,
        Arc<SqliteChatCache>,
        Arc<FakeRepository>,
        Arc<MemorySession>,
    ) {
        let cache = sqlite_cache();
        let repository = Arc::new(FakeRepository::new(cache.clone(), snapshot));
        let session = Arc::new(MemorySession::new(Some(me())));
        (
            EventReconciler::new(cache.clone(), repository.clone(), session.clone()),
            cache,
            repository,
            session,
        )
    }

    #[tokio::test]
    async fn new_message_for_unknown_chat_fetches_once_then_upserts() {
        let inner = sqlite_cache();
        let repository = Arc::new(FakeRepository::new(
            inner.clone(),
            Some(snapshot("chat1", &["alice", "me"])),
        ));
        let cache = Arc::new(OrderedCache {
            inner: (*inner).clone(),
            log: repository.log.clone(),
        });
        let reconciler = EventReconciler::new(
            cache.clone(),
            repository.clone(),
            Arc::new(MemorySession::new(None)),
        );

        let stored = reconciler.handle(new_message("m1", "chat1")).await.unwrap().unwrap();
        assert_eq!(stored.delivery_status, DeliveryStatus::Sent);
        assert_eq!(repository.calls(), vec!["chat1"]);

        assert_eq!(*repository.log.lock().unwrap(), vec!["fetch", "upsert"]);
        assert!(cache.get_chat_by_id("chat1").unwrap().is_some());

        // Chat is now cached: no second fetch.
        reconciler.handle(new_message("m2", "chat1")).await.unwrap();
        assert_eq!(repository.calls().len(), 1);
    }

    #[tokio::test]
    async fn new_message_survives_failed_fetch() {
        let (reconciler, cache, repository, _) = reconciler(None);

        let stored = reconciler.handle(new_message("m1", "ghost")).await.unwrap();
        assert_eq!(stored.map(|m| m.id).as_deref(), Some("m1"));
        assert_eq!(repository.calls(), vec!["ghost"]);
        assert_eq!(*repository.log.lock().unwrap(), vec!["fetch"]);
        assert!(cache.get_message_by_id("m1").unwrap().is_some());
    }

    #[tokio::test]
    async fn redelivered_delete_is_harmless() {
        let (reconciler, cache, _, _) = reconciler(Some(snapshot("chat1", &["alice"])));
        reconciler.handle(new_message("m1", "chat1")).await.unwrap();

        let delete = IncomingEvent::MessageDeleted(MessageDeleted {
            message_id: "m1".into(),
            chat_id: Some("chat1".into()),
        });
        assert!(reconciler.handle(delete.clone()).await.unwrap().is_none());
        assert!(reconciler.handle(delete).await.unwrap().is_none());
        assert!(cache.get_message_by_id("m1").unwrap().is_none());
        assert!(cache.get_chat_by_id("chat1").unwrap().is_some());
    }

    #[tokio::test]
    async fn own_profile_picture_updates_session() {
        let (reconciler, cache, _, session) = reconciler(Some(snapshot("chat1", &["me", "alice"])));
        reconciler.repository.fetch_chat_by_id("chat1").await.unwrap();

        let event = IncomingEvent::ProfilePictureUpdated(ProfilePictureUpdated {
            user_id: "me".into(),
            new_url: Some("https://cdn/me.png".into()),
        });
        reconciler.handle(event).await.unwrap();

        let db = cache.database();
        let stored = db.lock().unwrap().get_participant("me").unwrap().unwrap();
        assert_eq!(stored.profile_picture_url.as_deref(), Some("https://cdn/me.png"));
        assert_eq!(
            session.current().unwrap().user.profile_picture_url.as_deref(),
            Some("https://cdn/me.png")
        );
    }

    #[tokio::test]
    async fn other_users_picture_leaves_session_alone() {
        let (reconciler, _, _, session) = reconciler(None);
        let rx = session.observe_auth_info();

        let event = IncomingEvent::ProfilePictureUpdated(ProfilePictureUpdated {
            user_id: "alice".into(),
            new_url: None,
        });
        reconciler.handle(event).await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn participants_changed_refetches() {
        let (reconciler, cache, repository, _) = reconciler(Some(snapshot("chat1", &["a", "b"])));

        reconciler
            .handle(IncomingEvent::ChatParticipantsChanged(ChatParticipantsChanged {
                chat_id: "chat1".into(),
            }))
            .await
            .unwrap();

        assert_eq!(repository.calls(), vec!["chat1"]);
        let db = cache.database();
        let active = db.lock().unwrap().get_active_participant_ids("chat1").unwrap();
        assert_eq!(active.len(), 2);

        let err = reconciler
            .handle(IncomingEvent::ChatParticipantsChanged(ChatParticipantsChanged {
                chat_id: "gone".into(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Fetch(FetchError::NotFound(_))));
    }
}
