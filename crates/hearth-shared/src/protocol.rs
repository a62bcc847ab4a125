//! JSON shapes exchanged between Hearth clients and the server.
//!
//! Field names are camelCase on the wire so browser clients and the Rust
//! client read the same documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_CONTENT_LEN, MAX_GROUP_NAME_LEN, MAX_SDP_LEN};
use crate::error::ValidationError;
use crate::types::{CallId, GroupId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

/// A one-to-one message. Only `read` ever changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: MessageId,
    pub from: UserId,
    pub to: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub read: bool,
}

impl DirectMessage {
    /// Whether this message belongs to the conversation between `a` and `b`.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.from == a && &self.to == b) || (&self.from == b && &self.to == a)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub from: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// A named chat room. `messages` is append-only and kept in send order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupChat {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<UserId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<GroupMessage>,
}

impl GroupChat {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}

// ---------------------------------------------------------------------------
// Call signaling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP offer or answer, in the `RTCSessionDescriptionInit` JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn validate(&self, expected: SdpType) -> Result<(), ValidationError> {
        if self.kind != expected {
            return Err(ValidationError::InvalidSdp(format!(
                "expected {expected:?}, got {:?}",
                self.kind
            )));
        }
        if self.sdp.trim().is_empty() {
            return Err(ValidationError::InvalidSdp("empty sdp".into()));
        }
        if self.sdp.len() > MAX_SDP_LEN {
            return Err(ValidationError::InvalidSdp(format!(
                "sdp exceeds {MAX_SDP_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// A network path proposal, in the `RTCIceCandidateInit` JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.candidate.trim().is_empty() {
            return Err(ValidationError::EmptyCandidate);
        }
        Ok(())
    }
}

/// One call attempt between two users. Its state is implied by which fields
/// are present: no answer means the callee has not picked up yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub id: CallId,
    pub from: UserId,
    pub to: UserId,
    pub offer: SessionDescription,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
    #[serde(default)]
    pub ice_candidates: Vec<IceCandidate>,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn is_answered(&self) -> bool {
        self.answer.is_some()
    }

    /// The other party from `me`'s point of view.
    pub fn peer_of(&self, me: &UserId) -> &UserId {
        if &self.from == me {
            &self.to
        } else {
            &self.from
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub from: String,
    pub to: String,
    pub content: String,
}

/// Body carrying only the acting user (delete, leave, read receipt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessageRequest {
    pub from: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateCallRequest {
    pub from: String,
    pub to: String,
    pub offer: SessionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub answer: SessionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateRequest {
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedResponse {
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaveResponse {
    pub left: bool,
    /// True when the caller was the last member and the group is gone.
    pub dissolved: bool,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Validate chat content. Content is stored as sent; only emptiness is
/// judged on the trimmed text.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(ValidationError::ContentTooLong {
            max: MAX_CONTENT_LEN,
        });
    }
    Ok(())
}

pub fn validate_group_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyGroupName);
    }
    if name.chars().count() > MAX_GROUP_NAME_LEN {
        return Err(ValidationError::GroupNameTooLong {
            max: MAX_GROUP_NAME_LEN,
        });
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_message_uses_camel_case() {
        let msg = DirectMessage {
            id: MessageId::new(),
            from: UserId::parse("mom").unwrap(),
            to: UserId::parse("kid").unwrap(),
            content: "dinner at 7".into(),
            sent_at: Utc::now(),
            read: false,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("sentAt").is_some());
        assert_eq!(json["from"], "mom");
        assert_eq!(json["read"], false);
    }

    #[test]
    fn ice_candidate_matches_browser_shape() {
        let json = r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let candidate: IceCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert!(candidate.username_fragment.is_none());

        let back = serde_json::to_value(&candidate).unwrap();
        assert_eq!(back["sdpMLineIndex"], 0);
        assert!(back.get("usernameFragment").is_none());
    }

    #[test]
    fn session_description_type_field() {
        let desc: SessionDescription =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0"}"#).unwrap();
        assert_eq!(desc.kind, SdpType::Offer);
        assert!(desc.validate(SdpType::Offer).is_ok());
        assert!(desc.validate(SdpType::Answer).is_err());
        assert!(SessionDescription::answer("  ").validate(SdpType::Answer).is_err());
    }

    #[test]
    fn call_session_without_answer_is_pending() {
        let json = r#"{
            "id": "6f1c2d9e-7a4b-4c3d-9e8f-0a1b2c3d4e5f",
            "from": "alice",
            "to": "bob",
            "offer": {"type": "offer", "sdp": "v=0"},
            "createdAt": "2024-05-01T10:00:00Z"
        }"#;
        let session: CallSession = serde_json::from_str(json).unwrap();
        assert!(!session.is_answered());
        assert!(session.ice_candidates.is_empty());
        assert_eq!(session.peer_of(&UserId::parse("bob").unwrap()).as_str(), "alice");
    }

    #[test]
    fn content_validation() {
        assert!(validate_content("hi").is_ok());
        assert_eq!(validate_content("  \n"), Err(ValidationError::EmptyContent));
        let long = "a".repeat(MAX_CONTENT_LEN + 1);
        assert!(matches!(
            validate_content(&long),
            Err(ValidationError::ContentTooLong { .. })
        ));
    }

    #[test]
    fn group_name_is_trimmed() {
        assert_eq!(validate_group_name(" Family ").unwrap(), "Family");
        assert_eq!(validate_group_name(""), Err(ValidationError::EmptyGroupName));
    }
}
