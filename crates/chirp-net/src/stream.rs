//! Multicast stream with lazily started, subscriber-scoped upstream.
//!
//! A [`SharedStream`] runs a single upstream task on behalf of all of its
//! subscribers. The task starts with the first subscription, its items are
//! delivered to every live [`Subscription`], and it is aborted once no one
//! has been subscribed for `stop_timeout`. Late subscribers receive up to
//! `replay` of the most recent items from the current run before live ones.
//!
//! Every subscription has a bounded buffer. When one is full,
//! [`Publisher::emit`] waits, so a slow subscriber holds the upstream back
//! instead of missing items.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use chirp_shared::constants::DEFAULT_STOP_TIMEOUT_MS;

/// Sharing policy for a [`SharedStream`].
#[derive(Debug, Clone, Copy)]
pub struct SharingConfig {
    /// Grace period before the upstream is stopped after the last
    /// subscriber leaves. Zero stops it immediately.
    pub stop_timeout: Duration,
    /// Number of recent items handed to late subscribers.
    pub replay: usize,
    /// Per-subscriber buffer. A full buffer suspends the upstream.
    pub capacity: usize,
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            replay: 0,
            capacity: 256,
        }
    }
}

type Upstream<T> = dyn Fn(Publisher<T>) -> BoxFuture<'static, ()> + Send + Sync;

pub struct SharedStream<T: Clone + Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Clone for SharedStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T: Clone + Send + 'static> {
    name: &'static str,
    config: SharingConfig,
    upstream: Box<Upstream<T>>,
    state: Mutex<State<T>>,
}

struct State<T> {
    /// Buffers of the live subscriptions of the current run, by subscriber id.
    senders: Vec<(u64, mpsc::Sender<T>)>,
    task: Option<JoinHandle<()>>,
    replay: VecDeque<T>,
    subscribers: usize,
    next_subscriber: u64,
    /// Bumped whenever a pending teardown must be cancelled.
    idle_generation: u64,
    /// Identifies the current upstream run; stale publishers are ignored.
    run_id: u64,
}

impl<T: Clone + Send + 'static> SharedStream<T> {
    /// Create a stream whose upstream is produced by `upstream` each time it
    /// (re)starts. Nothing runs until the first [`subscribe`](Self::subscribe).
    pub fn new<F, Fut>(name: &'static str, config: SharingConfig, upstream: F) -> Self
    where
        F: Fn(Publisher<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                name,
                config,
                upstream: Box::new(move |publisher| upstream(publisher).boxed()),
                state: Mutex::new(State {
                    senders: Vec::new(),
                    task: None,
                    replay: VecDeque::new(),
                    subscribers: 0,
                    next_subscriber: 0,
                    idle_generation: 0,
                    run_id: 0,
                }),
            }),
        }
    }

    /// Subscribe, starting the upstream if it is not running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self) -> Subscription<T> {
        let mut state = self.inner.lock();
        state.subscribers += 1;
        state.idle_generation += 1;

        if state.task.is_none() {
            self.inner.start(&mut state);
        }

        state.next_subscriber += 1;
        let id = state.next_subscriber;
        let (sender, receiver) = mpsc::channel(self.inner.config.capacity.max(1));
        state.senders.push((id, sender));

        Subscription {
            id,
            backlog: state.replay.clone(),
            receiver,
            inner: self.inner.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers
    }

    /// Whether the upstream task is currently running.
    pub fn is_active(&self) -> bool {
        self.inner.lock().task.is_some()
    }
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(self: &Arc<Self>, state: &mut State<T>) {
        state.senders.clear();
        state.replay.clear();
        state.run_id += 1;
        let run_id = state.run_id;

        let publisher = Publisher {
            inner: Arc::downgrade(self),
            run_id,
        };
        let upstream = (self.upstream)(publisher);
        let weak = Arc::downgrade(self);

        debug!(stream = self.name, run_id, "Starting upstream");
        state.task = Some(tokio::spawn(async move {
            upstream.await;
            if let Some(inner) = weak.upgrade() {
                inner.finish(run_id);
            }
        }));
    }

    /// Upstream returned on its own: close every subscription.
    fn finish(&self, run_id: u64) {
        let mut state = self.lock();
        if state.run_id != run_id {
            return;
        }
        state.senders.clear();
        state.task = None;
        state.replay.clear();
        debug!(stream = self.name, run_id, "Upstream completed");
    }

    fn stop(&self, state: &mut State<T>) {
        if let Some(task) = state.task.take() {
            task.abort();
            debug!(stream = self.name, run_id = state.run_id, "Stopped upstream");
        }
        state.senders.clear();
        state.replay.clear();
        state.run_id += 1;
    }

    fn release(self: &Arc<Self>, subscriber: u64) {
        let mut state = self.lock();
        state.senders.retain(|(id, _)| *id != subscriber);
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers > 0 {
            return;
        }

        state.idle_generation += 1;
        let generation = state.idle_generation;
        let timeout = self.config.stop_timeout;

        if timeout.is_zero() {
            self.stop(&mut state);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(self);
                handle.spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if let Some(inner) = weak.upgrade() {
                        let mut state = inner.lock();
                        if state.subscribers == 0 && state.idle_generation == generation {
                            inner.stop(&mut state);
                        }
                    }
                });
            }
            // Dropped outside a runtime: nothing can run the timer.
            Err(_) => self.stop(&mut state),
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Inner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }
}

/// Handle given to the upstream to publish items.
pub struct Publisher<T: Clone + Send + 'static> {
    inner: Weak<Inner<T>>,
    run_id: u64,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    /// Deliver `item` to every current subscriber and remember it for replay,
    /// waiting for room in each subscriber's buffer.
    ///
    /// Returns `false` once this run has been stopped.
    pub async fn emit(&self, item: T) -> bool {
        let senders: Vec<mpsc::Sender<T>> = {
            let Some(inner) = self.inner.upgrade() else {
                return false;
            };
            let mut state = inner.lock();
            if state.run_id != self.run_id {
                return false;
            }
            if inner.config.replay > 0 {
                state.replay.push_back(item.clone());
                while state.replay.len() > inner.config.replay {
                    state.replay.pop_front();
                }
            }
            state.senders.iter().map(|(_, sender)| sender.clone()).collect()
        };

        for sender in senders {
            // A closed buffer belongs to a subscription that was just dropped.
            let _ = sender.send(item.clone()).await;
        }
        true
    }
}

/// A live subscription; dropping it releases the upstream.
pub struct Subscription<T: Clone + Send + 'static> {
    id: u64,
    backlog: VecDeque<T>,
    receiver: mpsc::Receiver<T>,
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Next item, or `None` once the upstream has completed or been stopped.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(item) = self.backlog.pop_front() {
            return Some(item);
        }
        self.receiver.recv().await
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.inner.release(self.id);
    }
}
