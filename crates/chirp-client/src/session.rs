//! Observable login session.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use chirp_shared::AuthInfo;
use chirp_store::{Database, StoreError};

pub trait SessionStorage: Send + Sync + 'static {
    /// Receiver that always holds the current session, `None` when signed out.
    fn observe_auth_info(&self) -> watch::Receiver<Option<AuthInfo>>;

    /// Persist a new session (or clear it) and notify observers.
    fn set(&self, info: Option<AuthInfo>) -> Result<(), StoreError>;

    fn current(&self) -> Option<AuthInfo> {
        self.observe_auth_info().borrow().clone()
    }
}

/// Session kept in the `session` table of the local database.
pub struct SqliteSessionStorage {
    db: Arc<Mutex<Database>>,
    state: watch::Sender<Option<AuthInfo>>,
}

impl SqliteSessionStorage {
    /// Load the stored session, if any.
    pub fn new(db: Arc<Mutex<Database>>) -> Result<Self, StoreError> {
        let stored = db
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .load_auth_info()?;
        let (state, _) = watch::channel(stored);
        Ok(Self { db, state })
    }
}

impl SessionStorage for SqliteSessionStorage {
    fn observe_auth_info(&self) -> watch::Receiver<Option<AuthInfo>> {
        self.state.subscribe()
    }

    fn set(&self, info: Option<AuthInfo>) -> Result<(), StoreError> {
        {
            let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
            match &info {
                Some(auth) => db.save_auth_info(auth)?,
                None => {
                    db.clear_auth_info()?;
                }
            }
        }
        tracing::debug!(signed_in = info.is_some(), "Session updated");
        self.state.send_replace(info);
        Ok(())
    }
}
