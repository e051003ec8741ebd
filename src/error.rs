use crate::backend::BackendError;

/// Errors surfaced to clients as RESP error replies.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("ERR unknown command '{0}', with args beginning with: {1}")]
    UnknownCommand(String, String),

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR unknown parameter for '{0}': {1}")]
    UnknownModifier(String, String),

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("ERR value for key '{key}' is not a valid JSON document: {reason}")]
    InvalidDocument { key: String, reason: String },

    #[error("ERR invalid command format")]
    InvalidFormat,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ProxyError {
    /// Render as the text of a RESP error reply. Backend failures name the
    /// command they interrupted.
    pub fn to_resp_error(&self, command: &str) -> String {
        match self {
            ProxyError::Backend(e) => format!("ERR {command} failed: {e}"),
            other => format!("{other}"),
        }
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
