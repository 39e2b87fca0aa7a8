use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read private key {path:?}: {source}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("No active connection for session {0}")]
    NoActiveConnection(String),

    #[error("Remote command exited with status {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializable error for the routing layer
#[derive(Serialize)]
pub struct SerializableError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&Error> for SerializableError {
    fn from(err: &Error) -> Self {
        let (code, message, details) = match err {
            Error::KeyRead { path, source } => (
                "KEY_READ_ERROR",
                format!("Failed to read private key {}", path.display()),
                Some(source.to_string()),
            ),
            Error::Connection(msg) => ("CONNECTION_ERROR", msg.clone(), None),
            Error::NoActiveConnection(session) => (
                "NO_ACTIVE_CONNECTION",
                format!("No active connection for session {}", session),
                None,
            ),
            Error::CommandFailed { exit_code, stderr } => (
                "COMMAND_FAILED",
                format!("Remote command exited with status {}", exit_code),
                Some(stderr.clone()),
            ),
            Error::Io(e) => ("IO_ERROR", e.to_string(), None),
        };

        SerializableError {
            code: code.to_string(),
            message,
            details,
        }
    }
}

// Implement Serialize for Error so the routing layer can pass failures through
impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        SerializableError::from(self).serialize(serializer)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
