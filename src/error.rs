use thiserror::Error;

/// Errors raised by the serial link and the acquisition loop
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("serial device {port} unavailable: {reason}")]
    LinkUnavailable { port: String, reason: String },

    #[error("transport error on {port}: {source}")]
    Transport {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serial link {0} is closed")]
    LinkClosed(String),

    #[error("malformed sample {line:?}: {reason}")]
    MalformedSample { line: String, reason: String },

    #[error("an acquisition run is already active")]
    Busy,

    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl RecorderError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        RecorderError::Configuration(msg.into())
    }

    pub(crate) fn malformed(line: &[u8], reason: impl Into<String>) -> Self {
        RecorderError::MalformedSample {
            line: String::from_utf8_lossy(line).into_owned(),
            reason: reason.into(),
        }
    }

    /// True for failures that end an acquisition run
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            RecorderError::Transport { .. }
                | RecorderError::LinkClosed(_)
                | RecorderError::LinkUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
