use hearth_shared::ValidationError;
use thiserror::Error;

/// Failure talking to the Hearth server.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The request never got an answer. Poll loops log these and retry on
    /// their next tick.
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    /// Map a non-success HTTP status and its `{error}` message.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => ClientError::Invalid(message),
            403 => ClientError::Forbidden(message),
            404 => ClientError::NotFound(message),
            409 => ClientError::Conflict(message),
            _ => ClientError::Server { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

impl From<ValidationError> for ClientError {
    fn from(err: ValidationError) -> Self {
        ClientError::Invalid(err.to_string())
    }
}
