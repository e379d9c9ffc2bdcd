use rusqlite::{params, OptionalExtension};

use crate::database::{timestamp_from_sql, timestamp_to_sql, Database};
use crate::error::Result;
use crate::models::{ChatMessage, DeliveryStatus};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, created_at, delivery_status";

impl Database {
    /// Insert a message, or overwrite the existing row with the same id.
    pub fn upsert_message(&self, message: &ChatMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chat_messages (id, chat_id, sender_id, content, created_at, delivery_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 chat_id = excluded.chat_id,
                 sender_id = excluded.sender_id,
                 content = excluded.content,
                 created_at = excluded.created_at,
                 delivery_status = excluded.delivery_status",
            params![
                message.id,
                message.chat_id,
                message.sender_id,
                message.content,
                timestamp_to_sql(&message.created_at),
                message.delivery_status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_message_by_id(&self, id: &str) -> Result<Option<ChatMessage>> {
        let message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Newest first.
    pub fn get_messages_for_chat(
        &self,
        chat_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM chat_messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![chat_id, limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Returns `true` if a row was updated.
    pub fn update_delivery_status(&self, id: &str, status: DeliveryStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_messages SET delivery_status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(affected > 0)
    }

    /// Returns `true` if a row was deleted.  Deleting a missing id is not an
    /// error.
    pub fn delete_message_by_id(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chat_messages WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let created_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;

    let delivery_status = status_str.parse::<DeliveryStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        created_at: timestamp_from_sql(4, &created_str)?,
        delivery_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn message(id: &str, minute: u32, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            chat_id: "chat1".to_string(),
            sender_id: "alice".to_string(),
            content: content.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
            delivery_status: DeliveryStatus::Sent,
        }
    }

    #[test]
    fn upsert_is_last_write_wins() {
        let db = Database::open_in_memory().unwrap();

        let mut msg = message("m1", 0, "draft");
        msg.delivery_status = DeliveryStatus::Pending;
        db.upsert_message(&msg).unwrap();

        let confirmed = message("m1", 0, "final");
        db.upsert_message(&confirmed).unwrap();

        let stored = db.get_message_by_id("m1").unwrap().unwrap();
        assert_eq!(stored, confirmed);
    }

    #[test]
    fn missing_message_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_message_by_id("nope").unwrap().is_none());
    }

    #[test]
    fn delete_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_message(&message("m1", 0, "hi")).unwrap();

        assert!(db.delete_message_by_id("m1").unwrap());
        assert!(!db.delete_message_by_id("m1").unwrap());
        assert!(db.get_message_by_id("m1").unwrap().is_none());
    }

    #[test]
    fn lists_newest_first_with_paging() {
        let db = Database::open_in_memory().unwrap();
        for (i, id) in ["m1", "m2", "m3"].iter().enumerate() {
            db.upsert_message(&message(id, i as u32, "x")).unwrap();
        }
        // Sub-second precision must still order correctly.
        let mut late = message("m4", 2, "x");
        late.created_at += Duration::milliseconds(500);
        db.upsert_message(&late).unwrap();

        let page: Vec<String> = db
            .get_messages_for_chat("chat1", 2, 0)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(page, vec!["m4", "m3"]);

        let rest = db.get_messages_for_chat("chat1", 10, 2).unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn delivery_status_updates() {
        let db = Database::open_in_memory().unwrap();
        let mut msg = message("m1", 0, "hi");
        msg.delivery_status = DeliveryStatus::Pending;
        db.upsert_message(&msg).unwrap();

        assert!(db.update_delivery_status("m1", DeliveryStatus::Failed).unwrap());
        assert!(!db.update_delivery_status("ghost", DeliveryStatus::Failed).unwrap());
        assert_eq!(
            db.get_message_by_id("m1").unwrap().unwrap().delivery_status,
            DeliveryStatus::Failed
        );
    }
}
