//! Hand-off of external URIs (deep links) to the navigation layer.
//!
//! A link can arrive before anything is ready to route it, e.g. while the
//! app is still starting. The queue keeps the newest such link and replays it
//! when a listener attaches.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

pub type UriListener = Box<dyn FnMut(String) + Send>;

/// Single-slot buffer plus the currently attached listener.
#[derive(Default)]
pub struct ExternalUriQueue {
    pending: Option<String>,
    listener: Option<UriListener>,
}

impl ExternalUriQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `uri` now if a listener is attached, otherwise keep it,
    /// replacing any older buffered URI.
    pub fn deliver_or_buffer(&mut self, uri: String) {
        match self.listener.as_mut() {
            Some(listener) => {
                self.pending = None;
                listener(uri);
            }
            None => {
                if let Some(dropped) = self.pending.replace(uri) {
                    debug!(uri = %dropped, "Replaced buffered URI");
                }
            }
        }
    }

    /// Attach a listener and flush the buffered URI into it.
    pub fn attach(&mut self, mut listener: UriListener) {
        if let Some(uri) = self.pending.take() {
            listener(uri);
        }
        self.listener = Some(listener);
    }

    pub fn detach(&mut self) {
        self.listener = None;
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn is_attached(&self) -> bool {
        self.listener.is_some()
    }
}

/// Owns the URI queue for the lifetime of the app and can be shared between
/// the platform entry point and the router.
#[derive(Default)]
pub struct NavigationController {
    queue: Mutex<ExternalUriQueue>,
}

impl NavigationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver_or_buffer(&self, uri: impl Into<String>) {
        self.queue().deliver_or_buffer(uri.into());
    }

    pub fn attach<F>(&self, listener: F)
    where
        F: FnMut(String) + Send + 'static,
    {
        self.queue().attach(Box::new(listener));
    }

    pub fn detach(&self) {
        self.queue().detach();
    }

    pub fn pending(&self) -> Option<String> {
        self.queue().pending().map(str::to_string)
    }

    fn queue(&self) -> MutexGuard<'_, ExternalUriQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
