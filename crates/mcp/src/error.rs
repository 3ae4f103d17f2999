use qq_agent_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    OneBot(#[from] qq_agent_onebot::Error),

    /// The client answered one of our requests with a JSON-RPC error.
    #[error("MCP error on '{method}': code={code} message={message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("invalid arguments: {0}")]
    InvalidParams(String),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

qq_agent_common::impl_context!();
