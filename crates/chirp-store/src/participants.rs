//! Participant profiles and chat membership.
//!
//! Membership rows (`chat_participant_cross_refs`) are soft-deleted: a user
//! leaving a chat is marked inactive rather than removed, so re-joining
//! restores the same row.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::{ChatParticipant, ChatParticipantCrossRef};

/// Membership changes needed to make local state match a server snapshot.
///
/// The three sets are disjoint by construction, so the order in which they
/// are applied does not matter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSyncPlan {
    /// Known but inactive locally, present on the server.
    pub to_reactivate: BTreeSet<String>,
    /// Active locally, absent on the server.
    pub to_deactivate: BTreeSet<String>,
    /// Never associated with this chat before.
    pub new_ids: BTreeSet<String>,
}

impl ParticipantSyncPlan {
    pub fn compute(
        server_ids: &BTreeSet<String>,
        all_local_ids: &BTreeSet<String>,
        active_local_ids: &BTreeSet<String>,
    ) -> Self {
        let inactive_local_ids: BTreeSet<String> =
            all_local_ids.difference(active_local_ids).cloned().collect();

        Self {
            to_reactivate: server_ids.intersection(&inactive_local_ids).cloned().collect(),
            to_deactivate: active_local_ids.difference(server_ids).cloned().collect(),
            new_ids: server_ids.difference(all_local_ids).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_reactivate.is_empty() && self.to_deactivate.is_empty() && self.new_ids.is_empty()
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    pub fn upsert_participant(&self, participant: &ChatParticipant) -> Result<()> {
        upsert_participant_in(self.conn(), participant)
    }

    pub fn get_participant(&self, user_id: &str) -> Result<Option<ChatParticipant>> {
        let participant = self
            .conn()
            .query_row(
                "SELECT user_id, username, profile_picture_url
                 FROM chat_participants WHERE user_id = ?1",
                params![user_id],
                row_to_participant,
            )
            .optional()?;
        Ok(participant)
    }

    /// Returns `true` if the user is known locally.
    pub fn update_profile_picture_url(&self, user_id: &str, url: Option<&str>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_participants SET profile_picture_url = ?1 WHERE user_id = ?2",
            params![url, user_id],
        )?;
        Ok(affected > 0)
    }

    /// Profiles of the active members of a chat, ordered by username.
    pub fn get_active_participants(&self, chat_id: &str) -> Result<Vec<ChatParticipant>> {
        let mut stmt = self.conn().prepare(
            "SELECT p.user_id, p.username, p.profile_picture_url
             FROM chat_participants p
             JOIN chat_participant_cross_refs r ON r.user_id = p.user_id
             WHERE r.chat_id = ?1 AND r.is_active = 1
             ORDER BY p.username ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], row_to_participant)?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub fn get_active_participant_ids(&self, chat_id: &str) -> Result<BTreeSet<String>> {
        active_ids_in(self.conn(), chat_id)
    }

    /// Every user ever associated with the chat, active or not.
    pub fn get_all_participant_ids(&self, chat_id: &str) -> Result<BTreeSet<String>> {
        all_ids_in(self.conn(), chat_id)
    }

    pub fn mark_participants_inactive(&self, chat_id: &str, user_ids: &BTreeSet<String>) -> Result<usize> {
        set_active_in(self.conn(), chat_id, user_ids, false)
    }

    pub fn reactivate_participants(&self, chat_id: &str, user_ids: &BTreeSet<String>) -> Result<usize> {
        set_active_in(self.conn(), chat_id, user_ids, true)
    }

    pub fn upsert_cross_refs(&self, cross_refs: &[ChatParticipantCrossRef]) -> Result<()> {
        for cross_ref in cross_refs {
            upsert_cross_ref_in(self.conn(), cross_ref)?;
        }
        Ok(())
    }

    /// Reconcile the membership of `chat_id` against a server snapshot.
    ///
    /// An empty snapshot means "no update" and leaves everything untouched.
    /// Otherwise all changes commit in a single transaction.
    pub fn sync_chat_participants(
        &mut self,
        chat_id: &str,
        participants: &[ChatParticipant],
    ) -> Result<ParticipantSyncPlan> {
        if participants.is_empty() {
            return Ok(ParticipantSyncPlan::default());
        }
        let tx = self.conn_mut().transaction()?;
        let plan = sync_participants_in(&tx, chat_id, participants)?;
        tx.commit()?;
        Ok(plan)
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers, usable inside a caller's transaction
// ---------------------------------------------------------------------------

pub(crate) fn sync_participants_in(
    conn: &Connection,
    chat_id: &str,
    participants: &[ChatParticipant],
) -> Result<ParticipantSyncPlan> {
    if participants.is_empty() {
        return Ok(ParticipantSyncPlan::default());
    }

    let server_ids: BTreeSet<String> = participants.iter().map(|p| p.user_id.clone()).collect();
    let all_local_ids = all_ids_in(conn, chat_id)?;
    let active_local_ids = active_ids_in(conn, chat_id)?;

    let plan = ParticipantSyncPlan::compute(&server_ids, &all_local_ids, &active_local_ids);

    set_active_in(conn, chat_id, &plan.to_reactivate, true)?;
    set_active_in(conn, chat_id, &plan.to_deactivate, false)?;
    for user_id in &plan.new_ids {
        upsert_cross_ref_in(
            conn,
            &ChatParticipantCrossRef {
                chat_id: chat_id.to_string(),
                user_id: user_id.clone(),
                is_active: true,
            },
        )?;
    }

    if !plan.is_empty() {
        tracing::debug!(chat = %chat_id, ?plan, "synced chat participants");
    }
    Ok(plan)
}

pub(crate) fn upsert_participant_in(conn: &Connection, participant: &ChatParticipant) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_participants (user_id, username, profile_picture_url)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO UPDATE SET
             username = excluded.username,
             profile_picture_url = excluded.profile_picture_url",
        params![
            participant.user_id,
            participant.username,
            participant.profile_picture_url,
        ],
    )?;
    Ok(())
}

fn upsert_cross_ref_in(conn: &Connection, cross_ref: &ChatParticipantCrossRef) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_participant_cross_refs (chat_id, user_id, is_active)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(chat_id, user_id) DO UPDATE SET is_active = excluded.is_active",
        params![cross_ref.chat_id, cross_ref.user_id, cross_ref.is_active],
    )?;
    Ok(())
}

fn active_ids_in(conn: &Connection, chat_id: &str) -> Result<BTreeSet<String>> {
    query_ids(
        conn,
        "SELECT user_id FROM chat_participant_cross_refs WHERE chat_id = ?1 AND is_active = 1",
        chat_id,
    )
}

fn all_ids_in(conn: &Connection, chat_id: &str) -> Result<BTreeSet<String>> {
    query_ids(
        conn,
        "SELECT user_id FROM chat_participant_cross_refs WHERE chat_id = ?1",
        chat_id,
    )
}

fn query_ids(conn: &Connection, sql: &str, chat_id: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![chat_id], |row| row.get::<_, String>(0))?;

    let mut ids = BTreeSet::new();
    for row in rows {
        ids.insert(row?);
    }
    Ok(ids)
}

fn set_active_in(
    conn: &Connection,
    chat_id: &str,
    user_ids: &BTreeSet<String>,
    active: bool,
) -> Result<usize> {
    if user_ids.is_empty() {
        return Ok(0);
    }
    let mut stmt = conn.prepare(
        "UPDATE chat_participant_cross_refs SET is_active = ?1 WHERE chat_id = ?2 AND user_id = ?3",
    )?;
    let mut affected = 0;
    for user_id in user_ids {
        affected += stmt.execute(params![active, chat_id, user_id])?;
    }
    Ok(affected)
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatParticipant> {
    Ok(ChatParticipant {
        user_id: row.get(0)?,
        username: row.get(1)?,
        profile_picture_url: row.get(2)?,
    })
}
