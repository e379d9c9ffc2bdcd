//! WebSocket transport connector.
//!
//! The connector owns at most one socket at a time. Its receive loop runs as
//! the upstream of a [`SharedStream`] of raw text frames, so the socket is
//! opened by the first subscriber and closed after the last one leaves.
//! Payloads are not interpreted here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use chirp_shared::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PING_INTERVAL_SECS, DEFAULT_WS_URL,
};
use chirp_shared::types::ConnectionState;

use crate::error::ConnectionError;
use crate::retry::ConnectionRetryHandler;
use crate::stream::{Publisher, SharedStream, SharingConfig};

/// Outbound frames buffered while the writer is busy.
const OUTBOUND_BUFFER: usize = 64;

/// Configuration for a [`WebSocketConnector`].
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// `ws://` or `wss://` endpoint of the chat server.
    pub url: String,
    /// Bearer token sent with the upgrade request.
    pub auth_token: Option<String>,
    /// Upper bound for TCP + TLS + upgrade handshake.
    pub connect_timeout: Duration,
    /// Keepalive ping period on an open socket. Zero falls back to the
    /// default period.
    pub ping_interval: Duration,
    /// Sharing policy of the inbound frame stream.
    ///
    /// Replay defaults to zero: a frame is an event to apply once, and a
    /// subscriber that attaches late would otherwise apply it again.
    pub sharing: SharingConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            auth_token: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            sharing: SharingConfig::default(),
        }
    }
}

pub struct WebSocketConnector {
    inner: Arc<ConnectorInner>,
    messages: SharedStream<String>,
}

struct ConnectorInner {
    url: String,
    connect_timeout: Duration,
    ping_interval: Duration,
    auth_token: Mutex<Option<String>>,
    retry: Arc<ConnectionRetryHandler>,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    /// Incremented by every receive loop on start.
    current_run: AtomicU64,
}

impl WebSocketConnector {
    pub fn new(config: ConnectorConfig, retry: Arc<ConnectionRetryHandler>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let ping_interval = if config.ping_interval.is_zero() {
            warn!("Zero ping interval, using default");
            Duration::from_secs(DEFAULT_PING_INTERVAL_SECS)
        } else {
            config.ping_interval
        };
        let inner = Arc::new(ConnectorInner {
            url: config.url,
            connect_timeout: config.connect_timeout,
            ping_interval,
            auth_token: Mutex::new(config.auth_token),
            retry,
            state,
            outbound: Mutex::new(None),
            current_run: AtomicU64::new(0),
        });

        let runner = inner.clone();
        let messages = SharedStream::new("ws-frames", config.sharing, move |publisher| {
            runner.clone().run(publisher)
        });

        Self { inner, messages }
    }

    /// Inbound text frames, one per envelope.
    pub fn messages(&self) -> &SharedStream<String> {
        &self.messages
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn retry_handler(&self) -> &Arc<ConnectionRetryHandler> {
        &self.inner.retry
    }

    /// Replace the token used by the next connection attempt.
    pub fn set_auth_token(&self, token: Option<String>) {
        *lock(&self.inner.auth_token) = token;
    }

    /// Queue a text frame on the open socket.
    pub async fn send(&self, frame: String) -> Result<(), ConnectionError> {
        let sender = lock(&self.inner.outbound)
            .clone()
            .ok_or(ConnectionError::NotConnected)?;
        sender
            .send(frame)
            .await
            .map_err(|_| ConnectionError::NotConnected)
    }
}

/// Publishes `Disconnected` however the receive loop ends, including abort.
/// A run that was superseded before it was dropped leaves state alone.
struct Teardown {
    inner: Arc<ConnectorInner>,
    run: u64,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.inner.is_current(self.run) {
            return;
        }
        *lock(&self.inner.outbound) = None;
        self.inner.set_state(ConnectionState::Disconnected);
    }
}

impl ConnectorInner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }

    fn is_current(&self, run: u64) -> bool {
        self.current_run.load(Ordering::SeqCst) == run
    }

    async fn run(self: Arc<Self>, publisher: Publisher<String>) {
        let run = self.current_run.fetch_add(1, Ordering::SeqCst) + 1;
        let _teardown = Teardown {
            inner: self.clone(),
            run,
        };
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            let err = match self.connect_and_read(run, &publisher, &mut attempt).await {
                Ok(()) => {
                    info!("Frame stream stopped, closing connection");
                    return;
                }
                Err(e) => e,
            };

            self.set_state(ConnectionState::Disconnected);

            if !self.retry.should_retry(&err, attempt) {
                error!(url = %self.url, error = %err, "Connection failed permanently");
                return;
            }

            warn!(attempt, error = %err, "Connection lost, scheduling reconnect");
            self.retry.apply_retry_delay(attempt).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// One connection lifetime. `Ok` only when the frame stream was stopped.
    async fn connect_and_read(
        &self,
        run: u64,
        publisher: &Publisher<String>,
        attempt: &mut u32,
    ) -> Result<(), ConnectionError> {
        let request = self.build_request()?;

        debug!(url = %self.url, attempt = *attempt, "Connecting");
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| ConnectionError::Timeout)??;

        *attempt = 0;
        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        *lock(&self.outbound) = Some(out_tx);
        self.set_state(ConnectionState::Connected);
        info!(url = %self.url, "WebSocket connected");

        let mut ping = tokio::time::interval(self.ping_interval);
        // The first tick completes immediately.
        ping.tick().await;

        let result = loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !publisher.emit(text).await {
                            break Ok(());
                        }
                    }
                    Some(Ok(Message::Close(close))) => {
                        debug!(frame = ?close, "Server sent close frame");
                        break Err(ConnectionError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                    None => break Err(ConnectionError::Closed),
                },

                Some(frame) = out_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(frame)).await {
                        break Err(e.into());
                    }
                }

                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        break Err(e.into());
                    }
                }
            }
        };

        if self.is_current(run) {
            *lock(&self.outbound) = None;
        }
        result
    }

    fn build_request(&self) -> Result<Request, ConnectionError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = lock(&self.auth_token).as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
