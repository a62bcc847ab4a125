//! Call signaling store: one record per call attempt, carrying the SDP
//! offer/answer and the ICE candidates both peers trickle in.
//!
//! At most one *unanswered* session may target a given callee at a time; a
//! second `initiate` is rejected with [`StoreError::Conflict`].

use chrono::{DateTime, Utc};
use hearth_shared::{
    CallId, CallSession, IceCandidate, SdpType, SessionDescription, UserId, ValidationError,
};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::rows::{format_ts, json_at, now, ts_at, user_at, uuid_at};

const SELECT_CALL: &str = "SELECT id, caller, callee, offer, answer, created_at
                           FROM call_sessions";

impl Database {
    /// Record a new call attempt from `from` to `to`.
    pub fn initiate_call(
        &self,
        from: &UserId,
        to: &UserId,
        offer: &SessionDescription,
    ) -> Result<CallSession> {
        offer.validate(SdpType::Offer)?;
        if from == to {
            return Err(ValidationError::SelfTarget("call").into());
        }

        let tx = self.conn().unchecked_transaction()?;

        let pending: Option<String> = tx
            .query_row(
                "SELECT id FROM call_sessions WHERE callee = ?1 AND answer IS NULL LIMIT 1",
                params![to.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = pending {
            tracing::debug!(callee = %to, existing = %existing, "rejecting second pending call");
            return Err(StoreError::Conflict(format!(
                "{to} already has an incoming call"
            )));
        }

        let session = CallSession {
            id: CallId::new(),
            from: from.clone(),
            to: to.clone(),
            offer: offer.clone(),
            answer: None,
            ice_candidates: Vec::new(),
            created_at: now(),
        };

        tx.execute(
            "INSERT INTO call_sessions (id, caller, callee, offer, answer, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![
                session.id.to_string(),
                session.from.as_str(),
                session.to.as_str(),
                serde_json::to_string(&session.offer)?,
                format_ts(&session.created_at),
            ],
        )?;
        tx.commit()?;

        tracing::info!(call = %session.id, from = %from, to = %to, "call initiated");
        Ok(session)
    }

    /// The most recent unanswered call addressed to `user`, if any.
    pub fn incoming_call(&self, user: &UserId) -> Result<Option<CallSession>> {
        let found = self
            .conn()
            .query_row(
                &format!(
                    "{SELECT_CALL}
                     WHERE callee = ?1 AND answer IS NULL
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1"
                ),
                params![user.as_str()],
                row_to_call,
            )
            .optional()?;

        match found {
            Some(mut session) => {
                session.ice_candidates = self.ice_candidates(session.id)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Snapshot of a session with all candidates appended so far.
    pub fn get_call(&self, id: CallId) -> Result<CallSession> {
        let mut session = self
            .conn()
            .query_row(
                &format!("{SELECT_CALL} WHERE id = ?1"),
                params![id.to_string()],
                row_to_call,
            )
            .map_err(not_found("Call"))?;
        session.ice_candidates = self.ice_candidates(id)?;
        Ok(session)
    }

    /// Store the callee's answer. A repeated answer overwrites the first.
    pub fn submit_answer(&self, id: CallId, answer: &SessionDescription) -> Result<CallSession> {
        answer.validate(SdpType::Answer)?;

        let affected = self.conn().execute(
            "UPDATE call_sessions SET answer = ?1 WHERE id = ?2",
            params![serde_json::to_string(answer)?, id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Call"));
        }

        tracing::info!(call = %id, "call answered");
        self.get_call(id)
    }

    /// Append an ICE candidate. Duplicates are stored as sent; consumers
    /// must apply idempotently.
    pub fn append_ice_candidate(&self, id: CallId, candidate: &IceCandidate) -> Result<CallSession> {
        candidate.validate()?;

        // The FK would reject it too, but with a less useful error.
        let exists = self
            .conn()
            .query_row(
                "SELECT 1 FROM call_sessions WHERE id = ?1",
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound("Call"));
        }

        self.conn().execute(
            "INSERT INTO call_ice_candidates (call_id, candidate) VALUES (?1, ?2)",
            params![id.to_string(), serde_json::to_string(candidate)?],
        )?;

        tracing::debug!(call = %id, "ice candidate appended");
        self.get_call(id)
    }

    /// Delete a session (hangup, decline or failure cleanup).
    pub fn terminate_call(&self, id: CallId) -> Result<()> {
        let affected = self.conn().execute(
            "DELETE FROM call_sessions WHERE id = ?1",
            params![id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound("Call"));
        }

        tracing::info!(call = %id, "call terminated");
        Ok(())
    }

    /// Delete sessions created before `cutoff`. Returns how many were removed.
    pub fn purge_stale_calls(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM call_sessions WHERE created_at < ?1",
            params![format_ts(&cutoff)],
        )?;
        if removed > 0 {
            tracing::info!(removed, "purged stale call sessions");
        }
        Ok(removed)
    }

    fn ice_candidates(&self, id: CallId) -> Result<Vec<IceCandidate>> {
        let mut stmt = self.conn().prepare(
            "SELECT candidate FROM call_ice_candidates WHERE call_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| json_at(row, 0))?;

        let mut candidates = Vec::new();
        for row in rows {
            candidates.push(row?);
        }
        Ok(candidates)
    }
}

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallSession> {
    let answer: Option<String> = row.get(4)?;
    let answer = match answer {
        Some(_) => Some(json_at(row, 4)?),
        None => None,
    };

    Ok(CallSession {
        id: CallId(uuid_at(row, 0)?),
        from: user_at(row, 1)?,
        to: user_at(row, 2)?,
        offer: json_at(row, 3)?,
        answer,
        ice_candidates: Vec::new(),
        created_at: ts_at(row, 5)?,
    })
}
