//! Group chat operations of the message store.
//!
//! A group owns its member set and an append-only message sequence. The
//! group disappears when its last member leaves or its creator deletes it.

use hearth_shared::{
    validate_content, validate_group_name, GroupChat, GroupId, GroupMessage, UserId,
};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::rows::{format_ts, now, ts_at, user_at, uuid_at};

/// Result of a member leaving a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The leaving user was the last member; the group has been deleted.
    pub dissolved: bool,
}

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a group. The creator is always a member; duplicate members
    /// are collapsed, keeping first-seen order.
    pub fn create_group(
        &self,
        name: &str,
        members: &[UserId],
        created_by: &UserId,
    ) -> Result<GroupChat> {
        let name = validate_group_name(name)?;

        let mut roster: Vec<UserId> = vec![created_by.clone()];
        for member in members {
            if !roster.contains(member) {
                roster.push(member.clone());
            }
        }

        let group = GroupChat {
            id: GroupId::new(),
            name,
            members: roster,
            created_by: created_by.clone(),
            created_at: now(),
            messages: Vec::new(),
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO group_chats (id, name, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                group.id.to_string(),
                group.name,
                group.created_by.as_str(),
                format_ts(&group.created_at),
            ],
        )?;
        for member in &group.members {
            tx.execute(
                "INSERT INTO group_members (group_id, username) VALUES (?1, ?2)",
                params![group.id.to_string(), member.as_str()],
            )?;
        }
        tx.commit()?;

        tracing::info!(
            group = %group.id,
            creator = %created_by,
            members = group.members.len(),
            "group chat created"
        );
        Ok(group)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a group with its members and messages.
    pub fn get_group(&self, id: GroupId) -> Result<GroupChat> {
        let (name, created_by, created_at) = self
            .conn()
            .query_row(
                "SELECT name, created_by, created_at FROM group_chats WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, user_at(row, 1)?, ts_at(row, 2)?)),
            )
            .map_err(not_found("Group"))?;

        Ok(GroupChat {
            id,
            name,
            members: self.group_members(id)?,
            created_by,
            created_at,
            messages: self.group_messages(id)?,
        })
    }

    /// Every group the user belongs to, oldest first.
    pub fn groups_for(&self, user: &UserId) -> Result<Vec<GroupChat>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id
             FROM group_chats g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.username = ?1
             ORDER BY g.created_at ASC, g.rowid ASC",
        )?;

        let ids = stmt.query_map(params![user.as_str()], |row| uuid_at(row, 0))?;

        let mut groups = Vec::new();
        for id in ids {
            groups.push(self.get_group(GroupId(id?))?);
        }
        Ok(groups)
    }

    fn group_members(&self, id: GroupId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT username FROM group_members WHERE group_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| user_at(row, 0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    fn group_messages(&self, id: GroupId) -> Result<Vec<GroupMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender, content, sent_at
             FROM group_messages
             WHERE group_id = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok(GroupMessage {
                from: user_at(row, 0)?,
                content: row.get(1)?,
                sent_at: ts_at(row, 2)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn is_group_member(&self, id: GroupId, user: &UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM group_members WHERE group_id = ?1 AND username = ?2",
                params![id.to_string(), user.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn group_creator(&self, id: GroupId) -> Result<UserId> {
        self.conn()
            .query_row(
                "SELECT created_by FROM group_chats WHERE id = ?1",
                params![id.to_string()],
                |row| user_at(row, 0),
            )
            .map_err(not_found("Group"))
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Append a message to a group. Only current members may post.
    pub fn append_group_message(
        &self,
        id: GroupId,
        from: &UserId,
        content: &str,
    ) -> Result<GroupMessage> {
        validate_content(content)?;
        self.group_creator(id)?;

        if !self.is_group_member(id, from)? {
            return Err(StoreError::Forbidden(format!(
                "{from} is not a member of this group"
            )));
        }

        let message = GroupMessage {
            from: from.clone(),
            content: content.to_string(),
            sent_at: now(),
        };
        self.conn().execute(
            "INSERT INTO group_messages (group_id, sender, content, sent_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.to_string(),
                message.from.as_str(),
                message.content,
                format_ts(&message.sent_at),
            ],
        )?;

        tracing::debug!(group = %id, from = %from, "group message stored");
        Ok(message)
    }

    /// Remove `user` from the group, deleting the group when it empties.
    pub fn leave_group(&self, id: GroupId, user: &UserId) -> Result<LeaveOutcome> {
        let tx = self.conn().unchecked_transaction()?;

        self.group_creator(id)?;
        let removed = tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND username = ?2",
            params![id.to_string(), user.as_str()],
        )?;
        if removed == 0 {
            return Err(StoreError::Forbidden(format!(
                "{user} is not a member of this group"
            )));
        }

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;

        let dissolved = remaining == 0;
        if dissolved {
            tx.execute(
                "DELETE FROM group_chats WHERE id = ?1",
                params![id.to_string()],
            )?;
        }
        tx.commit()?;

        tracing::info!(group = %id, user = %user, dissolved, "member left group");
        Ok(LeaveOutcome { dissolved })
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete the whole group. Only its creator may do this.
    pub fn delete_group(&self, id: GroupId, requester: &UserId) -> Result<()> {
        let creator = self.group_creator(id)?;
        if &creator != requester {
            return Err(StoreError::Forbidden(
                "only the creator can delete this group".into(),
            ));
        }

        self.conn().execute(
            "DELETE FROM group_chats WHERE id = ?1",
            params![id.to_string()],
        )?;

        tracing::info!(group = %id, "group chat deleted");
        Ok(())
    }
}
