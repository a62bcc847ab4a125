//! Direct message operations of the message store.
//!
//! A conversation's history is never stored as such: it is rebuilt by
//! filtering a participant's full message set for the counterpart.

use hearth_shared::{validate_content, DirectMessage, MessageId, UserId, ValidationError};
use rusqlite::params;

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::rows::{format_ts, now, ts_at, user_at, uuid_at};

const SELECT_DM: &str = "SELECT id, sender, recipient, content, sent_at, is_read
                         FROM direct_messages";

impl Database {
    /// Append a direct message. The store assigns the id and timestamp.
    pub fn insert_direct_message(
        &self,
        from: &UserId,
        to: &UserId,
        content: &str,
    ) -> Result<DirectMessage> {
        validate_content(content)?;
        if from == to {
            return Err(ValidationError::SelfTarget("message").into());
        }

        let message = DirectMessage {
            id: MessageId::new(),
            from: from.clone(),
            to: to.clone(),
            content: content.to_string(),
            sent_at: now(),
            read: false,
        };

        self.conn().execute(
            "INSERT INTO direct_messages (id, sender, recipient, content, sent_at, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                message.id.to_string(),
                message.from.as_str(),
                message.to.as_str(),
                message.content,
                format_ts(&message.sent_at),
            ],
        )?;

        tracing::debug!(id = %message.id, from = %from, to = %to, "direct message stored");
        Ok(message)
    }

    /// Every direct message the user sent or received, oldest first.
    pub fn direct_messages_for(&self, user: &UserId) -> Result<Vec<DirectMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_DM}
             WHERE sender = ?1 OR recipient = ?1
             ORDER BY sent_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(params![user.as_str()], row_to_direct_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_direct_message(&self, id: MessageId) -> Result<DirectMessage> {
        self.conn()
            .query_row(
                &format!("{SELECT_DM} WHERE id = ?1"),
                params![id.to_string()],
                row_to_direct_message,
            )
            .map_err(not_found("Message"))
    }

    /// Flag a message as read. Idempotent; when `reader` is given it must be
    /// the recipient.
    pub fn mark_read(&self, id: MessageId, reader: Option<&UserId>) -> Result<DirectMessage> {
        let mut message = self.get_direct_message(id)?;

        if let Some(reader) = reader {
            if reader != &message.to {
                return Err(StoreError::Forbidden(
                    "only the recipient can mark a message as read".into(),
                ));
            }
        }

        if !message.read {
            self.conn().execute(
                "UPDATE direct_messages SET is_read = 1 WHERE id = ?1",
                params![id.to_string()],
            )?;
            message.read = true;
        }

        Ok(message)
    }

    /// Delete a message on behalf of `requester`, who must be its sender.
    pub fn delete_direct_message(&self, id: MessageId, requester: &UserId) -> Result<()> {
        let message = self.get_direct_message(id)?;
        if &message.from != requester {
            return Err(StoreError::Forbidden(
                "only the sender can delete this message".into(),
            ));
        }

        self.conn().execute(
            "DELETE FROM direct_messages WHERE id = ?1",
            params![id.to_string()],
        )?;

        tracing::debug!(id = %id, "direct message deleted");
        Ok(())
    }
}

fn row_to_direct_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectMessage> {
    Ok(DirectMessage {
        id: MessageId(uuid_at(row, 0)?),
        from: user_at(row, 1)?,
        to: user_at(row, 2)?,
        content: row.get(3)?,
        sent_at: ts_at(row, 4)?,
        read: row.get(5)?,
    })
}
