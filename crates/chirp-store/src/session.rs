//! Persisted login session.
//!
//! The `session` table is a small key/value store with JSON values. Only the
//! auth record lives there today.

use rusqlite::{params, OptionalExtension};

use chirp_shared::types::AuthInfo;

use crate::database::Database;
use crate::error::Result;

const AUTH_INFO_KEY: &str = "auth_info";

impl Database {
    pub fn save_auth_info(&self, auth: &AuthInfo) -> Result<()> {
        let json = serde_json::to_string(auth)?;
        self.conn().execute(
            "INSERT INTO session (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![AUTH_INFO_KEY, json],
        )?;
        Ok(())
    }

    pub fn load_auth_info(&self) -> Result<Option<AuthInfo>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM session WHERE key = ?1",
                params![AUTH_INFO_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Forget the stored session. Returns `true` if one existed.
    pub fn clear_auth_info(&self) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM session WHERE key = ?1", params![AUTH_INFO_KEY])?;
        Ok(affected > 0)
    }
}
