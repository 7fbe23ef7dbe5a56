use std::path::PathBuf;

/// Errors surfaced by the bot runtime.
///
/// Only `Configuration` is fatal. Everything else is logged by the dispatcher
/// and the action that produced it is abandoned.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("database path \"{}\" does not exist or is not readable", path.display())]
    Configuration { path: PathBuf },

    #[error("database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("slack {operation} failed: {message}")]
    UpstreamService { operation: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    pub fn upstream(operation: &str, message: impl Into<String>) -> Self {
        Self::UpstreamService {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        Self::upstream("http request", e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BotError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
