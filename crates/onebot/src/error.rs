use qq_agent_common::FromMessage;

/// Errors raised by OneBot calls.
///
/// Every variant is recoverable from the caller's point of view: the context
/// engine logs and degrades to placeholder text or skips the affected target.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The endpoint answered with a non-zero `retcode`.
    #[error("OneBot {action} failed (retcode={retcode}): {message}")]
    Api {
        action: String,
        retcode: i64,
        message: String,
    },

    /// An id that must be numeric on the wire was not.
    #[error("invalid {field}: {value:?} is not numeric")]
    InvalidId { field: &'static str, value: String },

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

qq_agent_common::impl_context!();
