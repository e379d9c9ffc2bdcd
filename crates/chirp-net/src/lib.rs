// Real-time transport layer: WebSocket connector, reconnect policy and the
// shared frame stream it publishes on.

pub mod connector;
pub mod error;
pub mod retry;
pub mod stream;

pub use connector::{ConnectorConfig, WebSocketConnector};
pub use error::ConnectionError;
pub use retry::ConnectionRetryHandler;
pub use stream::{Publisher, SharedStream, SharingConfig, Subscription};
