//! CRUD operations for [`Chat`] records.

use rusqlite::{params, Connection, OptionalExtension};

use crate::database::{timestamp_from_sql, timestamp_to_sql, Database};
use crate::error::Result;
use crate::models::{Chat, ChatParticipant, ChatWithParticipants};
use crate::participants::{self, ParticipantSyncPlan};

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert a chat, or refresh the existing row.
    pub fn upsert_chat(&self, chat: &Chat) -> Result<()> {
        upsert_chat_in(self.conn(), chat)
    }

    /// Store a chat snapshot fetched from the server: the chat row, every
    /// participant profile, and the membership sync, in one transaction.
    pub fn save_chat_with_participants(
        &mut self,
        chat: &Chat,
        participants: &[ChatParticipant],
    ) -> Result<ParticipantSyncPlan> {
        let tx = self.conn_mut().transaction()?;
        upsert_chat_in(&tx, chat)?;
        for participant in participants {
            participants::upsert_participant_in(&tx, participant)?;
        }
        let plan = participants::sync_participants_in(&tx, &chat.id, participants)?;
        tx.commit()?;

        tracing::debug!(
            chat = %chat.id,
            participants = participants.len(),
            reactivated = plan.to_reactivate.len(),
            deactivated = plan.to_deactivate.len(),
            added = plan.new_ids.len(),
            "saved chat snapshot"
        );
        Ok(plan)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat_by_id(&self, id: &str) -> Result<Option<Chat>> {
        let chat = self
            .conn()
            .query_row(
                "SELECT id, last_activity_at, last_message FROM chats WHERE id = ?1",
                params![id],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    /// Chat plus its active participants.
    pub fn get_chat_with_participants(&self, id: &str) -> Result<Option<ChatWithParticipants>> {
        let Some(chat) = self.get_chat_by_id(id)? else {
            return Ok(None);
        };
        let participants = self.get_active_participants(id)?;
        Ok(Some(ChatWithParticipants { chat, participants }))
    }

    /// List all chats, most recently active first.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, last_activity_at, last_message
             FROM chats
             ORDER BY last_activity_at DESC",
        )?;

        let rows = stmt.query_map([], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    // ON DELETE CASCADE: memberships go with it, messages stay
    pub fn delete_chat(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn upsert_chat_in(conn: &Connection, chat: &Chat) -> Result<()> {
    conn.execute(
        "INSERT INTO chats (id, last_activity_at, last_message)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
             last_activity_at = excluded.last_activity_at,
             last_message = excluded.last_message",
        params![
            chat.id,
            timestamp_to_sql(&chat.last_activity_at),
            chat.last_message,
        ],
    )?;
    Ok(())
}

/// Map a `rusqlite::Row` to a [`Chat`].
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let last_activity: String = row.get(1)?;
    Ok(Chat {
        id: row.get(0)?,
        last_activity_at: timestamp_from_sql(1, &last_activity)?,
        last_message: row.get(2)?,
    })
}
