use thiserror::Error;

/// Failures of a single call to the completion endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request was cancelled")]
    Cancelled,

    #[error("request timed out")]
    Timeout,

    #[error("backend is not reachable: {0}")]
    Network(String),

    #[error("backend responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend returned a malformed payload: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        return *self == TransportError::Cancelled;
    }

    pub fn is_timeout(&self) -> bool {
        return *self == TransportError::Timeout;
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            return TransportError::Timeout;
        }
        if err.is_decode() {
            return TransportError::Malformed(err.to_string());
        }

        return TransportError::Network(err.to_string());
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("no model is selected")]
    NoModelSelected,

    #[error("a response is still streaming for this conversation")]
    SubmissionInFlight,

    #[error("a message with id '{0}' already exists")]
    DuplicateMessageId(String),

    #[error("message '{0}' is already streaming")]
    AlreadyStreaming(String),

    #[error("conversation id is already '{current}', refusing to change it to '{attempted}'")]
    ConversationIdConflict { current: String, attempted: String },

    #[error("no message with id '{0}'")]
    MessageNotFound(String),

    #[error("fragment could not be parsed: {0}")]
    MalformedFragment(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
