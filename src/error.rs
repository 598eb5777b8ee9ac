//! Error types for texbot.

use std::time::Duration;

use crate::pipeline::Stage;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Workspace errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of one render attempt. Never escapes the pipeline runner; it is
/// carried inside a `PipelineOutcome`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to write source document: {0}")]
    Source(#[from] WorkspaceError),

    #[error("{stage} failed to start: {reason}")]
    Spawn { stage: Stage, reason: String },

    #[error("{stage} timed out after {timeout:?}")]
    Timeout { stage: Stage, timeout: Duration },

    #[error("{stage} exited with status {code:?}")]
    ExitStatus { stage: Stage, code: Option<i32> },

    #[error("Waiting on {stage} failed: {reason}")]
    Wait { stage: Stage, reason: String },
}

/// Job submission errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Render queue is full ({capacity} jobs waiting)")]
    Busy { capacity: usize },

    #[error("Dispatcher is shut down")]
    Closed,

    #[error("Failed to create worker workspace: {0}")]
    Workspace(#[from] WorkspaceError),
}
