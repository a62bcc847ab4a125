//! The server operations the poller and the call controller depend on.
//!
//! [`crate::api::ApiClient`] implements both over HTTP; tests use in-memory
//! fakes.

use async_trait::async_trait;
use hearth_shared::{
    CallId, CallSession, DirectMessage, GroupChat, IceCandidate, MessageId, SessionDescription,
    UserId,
};

use crate::error::ClientError;

#[async_trait]
pub trait MessageFeed: Send + Sync {
    /// Every direct message sent or received by `user`, oldest first.
    async fn direct_messages(&self, user: &UserId) -> Result<Vec<DirectMessage>, ClientError>;

    /// Every group `user` belongs to, with its messages.
    async fn groups_for(&self, user: &UserId) -> Result<Vec<GroupChat>, ClientError>;

    async fn mark_read(&self, id: MessageId, reader: &UserId) -> Result<(), ClientError>;
}

#[async_trait]
pub trait CallSignaling: Send + Sync {
    async fn initiate(
        &self,
        from: &UserId,
        to: &UserId,
        offer: &SessionDescription,
    ) -> Result<CallSession, ClientError>;

    /// The newest unanswered call addressed to `user`.
    async fn fetch_incoming(&self, user: &UserId) -> Result<Option<CallSession>, ClientError>;

    async fn get(&self, id: CallId) -> Result<CallSession, ClientError>;

    async fn submit_answer(
        &self,
        id: CallId,
        answer: &SessionDescription,
    ) -> Result<CallSession, ClientError>;

    async fn add_ice(&self, id: CallId, candidate: &IceCandidate)
        -> Result<CallSession, ClientError>;

    async fn terminate(&self, id: CallId) -> Result<(), ClientError>;
}
