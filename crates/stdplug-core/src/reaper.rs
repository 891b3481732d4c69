//! Ownership of a live `tokio::process::Child`.
//!
//! The child is moved into a background task that waits for it and serves
//! kill and signal requests, so waiting, signalling and killing never contend
//! for a lock on the child. Platform crates build their
//! [`crate::ManagedProcess`] implementations on top of this.

use crate::process::{ProcessError, ProcessId, ProcessStatus};
use std::io;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Delivers a platform signal to a pid the reaper has not yet reaped
pub type Deliver = Box<dyn FnOnce(ProcessId) -> Result<(), ProcessError> + Send>;

enum Request {
    Kill(oneshot::Sender<io::Result<()>>),
    Signal(Deliver, oneshot::Sender<Result<(), ProcessError>>),
}

type Outcome = Option<Result<ProcessStatus, String>>;

pub struct ChildReaper {
    pid: Option<ProcessId>,
    status: watch::Receiver<Outcome>,
    requests: mpsc::Sender<Request>,
}

impl ChildReaper {
    /// Take ownership of `child`. Dropping the reaper kills the child if it is
    /// still running.
    pub fn spawn(mut child: Child) -> Self {
        let pid = child.id();
        let (status_tx, status_rx) = watch::channel(None);
        let (requests, mut request_rx) = mpsc::channel::<Request>(1);

        tokio::spawn(async move {
            let mut detached = false;
            let exit = loop {
                tokio::select! {
                    exit = child.wait() => break exit,
                    request = request_rx.recv(), if !detached => match request {
                        Some(Request::Kill(reply)) => {
                            let _ = reply.send(child.start_kill());
                        }
                        // `id()` is None once the child is reaped, so the
                        // pid cannot have been recycled yet.
                        Some(Request::Signal(deliver, reply)) => {
                            let result = match child.id() {
                                Some(pid) => deliver(pid),
                                None => Err(ProcessError::AlreadyExited),
                            };
                            let _ = reply.send(result);
                        }
                        None => {
                            detached = true;
                            if let Err(e) = child.start_kill() {
                                warn!(pid = ?pid, error = %e, "Failed to kill abandoned child process");
                            }
                        }
                    },
                }
            };

            let outcome = match exit {
                Ok(status) => {
                    let status = ProcessStatus::from(status);
                    info!(pid = ?pid, %status, "Child process exited");
                    Ok(status)
                }
                Err(e) => {
                    warn!(pid = ?pid, error = %e, "Failed to wait for child process");
                    Err(e.to_string())
                }
            };
            let _ = status_tx.send(Some(outcome));
        });

        Self {
            pid,
            status: status_rx,
            requests,
        }
    }

    /// PID of the child (None if it exited before it could be observed)
    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.status.borrow().is_some()
    }

    pub async fn wait(&self) -> Result<ProcessStatus, ProcessError> {
        let mut status = self.status.clone();
        let outcome: Outcome = {
            let current = status
                .wait_for(Option::is_some)
                .await
                .map_err(|_| ProcessError::SupervisorGone)?;
            Outcome::clone(&current)
        };

        match outcome {
            Some(Ok(status)) => Ok(status),
            Some(Err(e)) => Err(ProcessError::WaitFailed(e)),
            None => Err(ProcessError::SupervisorGone),
        }
    }

    pub async fn kill(&self) -> Result<(), ProcessError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(Request::Kill(reply_tx)).await?;

        reply_rx.await.map_err(|_| ProcessError::AlreadyExited)??;
        debug!(pid = ?self.pid, "Kill requested for child process");
        Ok(())
    }

    /// Run `deliver` on the reaper task with the child's pid.
    ///
    /// Fails with [`ProcessError::AlreadyExited`] instead of calling
    /// `deliver` once the child has been reaped.
    pub async fn signal(&self, deliver: Deliver) -> Result<(), ProcessError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request(Request::Signal(deliver, reply_tx)).await?;

        reply_rx.await.map_err(|_| ProcessError::AlreadyExited)?
    }

    async fn request(&self, request: Request) -> Result<(), ProcessError> {
        if self.has_exited() {
            return Err(ProcessError::AlreadyExited);
        }
        self.requests
            .send(request)
            .await
            .map_err(|_| ProcessError::AlreadyExited)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_wait_reports_exit_code() {
        let child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let reaper = ChildReaper::spawn(child);

        assert_eq!(reaper.wait().await.unwrap(), ProcessStatus::Exited(3));
        assert!(reaper.has_exited());
        // A second wait sees the same status.
        assert_eq!(reaper.wait().await.unwrap(), ProcessStatus::Exited(3));
    }

    #[tokio::test]
    async fn test_kill_while_waiting() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let reaper = std::sync::Arc::new(ChildReaper::spawn(child));

        let waiting = tokio::spawn({
            let reaper = reaper.clone();
            async move { reaper.wait().await }
        });

        reaper.kill().await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(status, ProcessStatus::Signaled(9));
    }

    #[tokio::test]
    async fn test_kill_after_exit() {
        let child = Command::new("true").spawn().unwrap();
        let reaper = ChildReaper::spawn(child);
        reaper.wait().await.unwrap();

        assert!(matches!(
            reaper.kill().await,
            Err(ProcessError::AlreadyExited)
        ));
        assert!(matches!(
            reaper
                .signal(Box::new(|_: ProcessId| -> Result<(), ProcessError> {
                    panic!("reaped child signalled")
                }))
                .await,
            Err(ProcessError::AlreadyExited)
        ));
    }

    #[tokio::test]
    async fn test_signal_receives_live_pid() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let reaper = ChildReaper::spawn(child);
        let expected = reaper.pid().unwrap();

        let (seen_tx, seen_rx) = oneshot::channel();
        reaper
            .signal(Box::new(move |pid: ProcessId| -> Result<(), ProcessError> {
                let _ = seen_tx.send(pid);
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(seen_rx.await.unwrap(), expected);

        reaper.kill().await.unwrap();
        reaper.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_signal_error_is_returned() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let reaper = ChildReaper::spawn(child);

        let err = reaper
            .signal(Box::new(|_: ProcessId| -> Result<(), ProcessError> {
                Err(ProcessError::Other("denied".into()))
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Other(ref m) if m == "denied"));

        reaper.kill().await.unwrap();
    }
}
