use crate::process::ProcessError;
use thiserror::Error;

/// Errors raised while opening or closing a channel to a child process
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child process {0} pipe is unavailable")]
    PipeUnavailable(&'static str),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("failed to close stream: {0}")]
    StreamClose(#[source] std::io::Error),

    #[error("failed to signal process: {0}")]
    Signal(#[source] ProcessError),

    #[error("failed waiting for process: {0}")]
    Wait(#[source] ProcessError),

    /// The child ignored the shutdown signal and was killed.
    #[error("timed out waiting for process to stop")]
    Timeout,

    #[error("error killing process after timeout: {0}")]
    KillAfterTimeout(#[source] ProcessError),

    #[error("process wait task ended without reporting a status")]
    WaitAbandoned,
}

impl ChannelError {
    /// Check if this error came from opening a channel
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            ChannelError::Spawn { .. }
                | ChannelError::PipeUnavailable(_)
                | ChannelError::ConfigurationError(_)
        )
    }

    /// Check if the child had to be force-killed, successfully or not
    pub fn is_forced_shutdown(&self) -> bool {
        matches!(
            self,
            ChannelError::Timeout | ChannelError::KillAfterTimeout(_)
        )
    }
}
