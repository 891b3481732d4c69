use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a process
pub type ProcessId = u32;

/// Status of a process after it exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process exited normally with the given exit code
    Exited(i32),
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Signaled(i32),
    /// Process status is unknown
    Unknown,
}

impl ProcessStatus {
    pub fn success(&self) -> bool {
        matches!(self, ProcessStatus::Exited(0))
    }
}

impl From<std::process::ExitStatus> for ProcessStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ProcessStatus::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessStatus::Signaled(signal);
            }
        }

        ProcessStatus::Unknown
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Exited(code) => write!(f, "exit status {code}"),
            ProcessStatus::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            ProcessStatus::Unknown => f.write_str("unknown status"),
        }
    }
}

/// Signal sent to ask a child to stop before it is force-killed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessSignal {
    /// SIGINT on Unix
    #[default]
    Interrupt,
    /// SIGTERM on Unix
    Terminate,
}

impl fmt::Display for ProcessSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessSignal::Interrupt => f.write_str("interrupt"),
            ProcessSignal::Terminate => f.write_str("terminate"),
        }
    }
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("process already finished")]
    AlreadyExited,
    #[error("{0} signal is not supported on this platform")]
    UnsupportedSignal(ProcessSignal),
    #[error("failed to send {signal} to process {pid}: {reason}")]
    SignalFailed {
        pid: ProcessId,
        signal: ProcessSignal,
        reason: String,
    },
    #[error("failed to wait for process: {0}")]
    WaitFailed(String),
    #[error("process supervisor is gone")]
    SupervisorGone,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Other error: {0}")]
    Other(String),
}

/// Capability set the shutdown sequencer needs from a spawned child.
///
/// Every method takes `&self` so that a wait can be in flight on one task
/// while another task signals or kills the same process. There are two kinds
/// of implementation: the OS-backed ones in the platform crates and the fake
/// in [`crate::testing`].
#[async_trait]
pub trait ManagedProcess: Send + Sync + 'static {
    /// Wait for the process to exit. Resolves with the exit status; an error
    /// means the wait itself failed, not that the process exited non-zero.
    async fn wait(&self) -> Result<ProcessStatus, ProcessError>;

    /// Ask the process to stop.
    async fn signal(&self, signal: ProcessSignal) -> Result<(), ProcessError>;

    /// Force the process to stop.
    async fn kill(&self) -> Result<(), ProcessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(ProcessStatus::Exited(0).success());
        assert!(!ProcessStatus::Exited(2).success());
        assert!(!ProcessStatus::Signaled(9).success());
        assert!(!ProcessStatus::Unknown.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_status_from_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let exited = std::process::ExitStatus::from_raw(3 << 8);
        assert_eq!(ProcessStatus::from(exited), ProcessStatus::Exited(3));

        let killed = std::process::ExitStatus::from_raw(9);
        assert_eq!(ProcessStatus::from(killed), ProcessStatus::Signaled(9));
    }

    #[test]
    fn test_signal_serialization() {
        let json = serde_json::to_string(&ProcessSignal::Terminate).unwrap();
        assert_eq!(json, "\"terminate\"");
        assert_eq!(ProcessSignal::default(), ProcessSignal::Interrupt);
    }

    #[test]
    fn test_error_display() {
        let error = ProcessError::SignalFailed {
            pid: 42,
            signal: ProcessSignal::Interrupt,
            reason: "EPERM".to_string(),
        };
        let display = format!("{error}");
        assert!(display.contains("interrupt"));
        assert!(display.contains("42"));
    }
}
