use thiserror::Error;

/// Malformed or missing input. Maps to HTTP 400 at the API boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Username must not be empty")]
    EmptyUsername,

    #[error("Username is too long (max {max} characters)")]
    UsernameTooLong { max: usize },

    #[error("Username contains invalid characters")]
    UsernameInvalid,

    #[error("Message content must not be empty")]
    EmptyContent,

    #[error("Message content is too long (max {max} characters)")]
    ContentTooLong { max: usize },

    #[error("Group name must not be empty")]
    EmptyGroupName,

    #[error("Group name is too long (max {max} characters)")]
    GroupNameTooLong { max: usize },

    #[error("Cannot {0} yourself")]
    SelfTarget(&'static str),

    #[error("Invalid {kind} id: {value}")]
    InvalidId { kind: &'static str, value: String },

    #[error("Invalid session description: {0}")]
    InvalidSdp(String),

    #[error("ICE candidate must not be empty")]
    EmptyCandidate,
}
