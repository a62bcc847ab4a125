use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_USERNAME_LEN;
use crate::error::ValidationError;

// A user is identified by username; the user directory owns the accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Validate and normalize a username (surrounding whitespace is trimmed).
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }
        if name.chars().count() > MAX_USERNAME_LEN {
            return Err(ValidationError::UsernameTooLong {
                max: MAX_USERNAME_LEN,
            });
        }
        // "." and ".." would collapse out of URL paths like /messages/{user}.
        if name == "." || name == ".." || name.chars().any(|c| c == '/' || c.is_control()) {
            return Err(ValidationError::UsernameInvalid);
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(raw: &str) -> Result<Self, ValidationError> {
                Uuid::parse_str(raw.trim())
                    .map(Self)
                    .map_err(|_| ValidationError::InvalidId {
                        kind: $kind,
                        value: raw.to_string(),
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Direct message identifier.
    MessageId,
    "message"
);
uuid_id!(
    /// Group chat identifier.
    GroupId,
    "group"
);
uuid_id!(
    /// Call session identifier. Never reused across call attempts.
    CallId,
    "call"
);
