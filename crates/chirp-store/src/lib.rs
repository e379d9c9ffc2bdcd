//! # chirp-store
//!
//! Local on-device cache for the Chirp client, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for chats, participants,
//! participant memberships, messages and the persisted session. Callers that
//! share it across tasks are expected to serialize access (one writer at a
//! time), which SQLite requires anyway.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod participants;
pub mod session;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
pub use participants::ParticipantSyncPlan;
