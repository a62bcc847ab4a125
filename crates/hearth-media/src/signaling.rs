use std::collections::HashSet;

use hearth_shared::IceCandidate;
use tracing::debug;

/// Bookkeeping for ICE candidates exchanged through a call session.
///
/// The session keeps one list holding both parties' candidates and every
/// poll returns all of them. The ledger remembers which ones this side
/// posted and which it already applied, so each remote candidate reaches
/// the peer link exactly once.
#[derive(Debug, Default)]
pub struct IceLedger {
    own: HashSet<IceCandidate>,
    applied: HashSet<IceCandidate>,
}

impl IceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a candidate gathered locally, before it is posted.
    pub fn record_local(&mut self, candidate: &IceCandidate) {
        self.own.insert(candidate.clone());
    }

    /// Return the candidates not seen before, in session order, and mark
    /// them applied.
    pub fn fresh(&mut self, candidates: &[IceCandidate]) -> Vec<IceCandidate> {
        let fresh: Vec<IceCandidate> = candidates
            .iter()
            .filter(|c| !self.own.contains(*c))
            .filter(|c| self.applied.insert((*c).clone()))
            .cloned()
            .collect();

        if !fresh.is_empty() {
            debug!(count = fresh.len(), total = self.applied.len(), "New remote ICE candidates");
        }
        fresh
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}
