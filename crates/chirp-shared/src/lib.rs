//! Types and wire protocol shared by every Chirp crate.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::DecodeError;
pub use protocol::{decode, ChatEnvelope, IncomingEvent, OutgoingEvent};
pub use types::{AuthInfo, ConnectionState, User};
