//! Graceful shutdown: close the streams, signal, wait out the grace period,
//! kill as a last resort.

use crate::config::ShutdownPolicy;
use crate::duplex::{CloseRead, CloseWrite, Duplex};
use crate::error::ChannelError;
use crate::process::{ManagedProcess, ProcessError, ProcessStatus};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Close `stream`, then stop `process`.
///
/// The process is signalled even when closing the stream fails. If both steps
/// fail the process error is returned and the stream error is logged.
pub async fn close_channel<R, W, P>(
    stream: Duplex<R, W>,
    process: Arc<P>,
    policy: &ShutdownPolicy,
) -> Result<ProcessStatus, ChannelError>
where
    R: CloseRead,
    W: CloseWrite,
    P: ManagedProcess,
{
    let stream_result = stream.close().await;
    let process_result = shutdown_process(process, policy).await;

    match (stream_result, process_result) {
        (Ok(()), result) => result,
        (Err(stream_err), Ok(status)) => {
            debug!(%status, "Process stopped but its stream failed to close");
            Err(ChannelError::StreamClose(stream_err))
        }
        (Err(stream_err), Err(process_err)) => {
            warn!(error = %stream_err, "Failed to close stream while shutting down process");
            Err(process_err)
        }
    }
}

/// Signal `process` and give it `policy.grace_period()` to exit before killing it.
///
/// Returns the process's own wait result when it exits in time. A kill after
/// the grace period is reported as [`ChannelError::Timeout`], or as
/// [`ChannelError::KillAfterTimeout`] when the kill itself fails.
pub async fn shutdown_process<P: ManagedProcess>(
    process: Arc<P>,
    policy: &ShutdownPolicy,
) -> Result<ProcessStatus, ChannelError> {
    let (done_tx, mut done_rx) = oneshot::channel();
    let waiter = tokio::spawn({
        let process = process.clone();
        async move {
            let _ = done_tx.send(process.wait().await);
        }
    });

    match process.signal(policy.signal).await {
        Ok(()) => debug!(signal = %policy.signal, "Signalled process; waiting for exit"),
        // exited on its own once its stdin closed; the wait returns at once
        Err(ProcessError::AlreadyExited) => debug!("Process exited before it was signalled"),
        Err(e) => {
            waiter.abort();
            return Err(ChannelError::Signal(e));
        }
    }

    let grace_period = policy.grace_period();
    match tokio::time::timeout(grace_period, &mut done_rx).await {
        Ok(Ok(result)) => result.map_err(ChannelError::Wait),
        Ok(Err(_)) => Err(ChannelError::WaitAbandoned),
        Err(_) => {
            warn!(
                grace_period_ms = policy.grace_period_ms,
                "Process did not exit within grace period, killing it"
            );

            if let Err(e) = process.kill().await {
                error!(error = %e, "Failed to kill process after timeout");
                waiter.abort();
                return Err(ChannelError::KillAfterTimeout(e));
            }

            match tokio::time::timeout(grace_period, done_rx).await {
                Ok(Ok(result)) => info!(?result, "Killed process has exited"),
                Ok(Err(_)) => debug!("Wait task ended without a result after kill"),
                Err(_) => {
                    warn!("Killed process still not reaped, abandoning wait");
                    waiter.abort();
                }
            }

            Err(ChannelError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessSignal;
    use crate::testing::{CloseProbe, FakeProcess};
    use std::time::Duration;

    fn fast_policy() -> ShutdownPolicy {
        ShutdownPolicy::new().with_grace_period(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_prompt_exit_returns_wait_result() {
        let process = FakeProcess::new();

        let status = shutdown_process(Arc::new(process.clone()), &fast_policy())
            .await
            .unwrap();

        assert_eq!(status, ProcessStatus::Exited(0));
        assert_eq!(process.signals(), vec![ProcessSignal::Interrupt]);
        assert_eq!(process.kill_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_error_is_returned() {
        let process = FakeProcess::new().with_wait_error("no child");

        let err = shutdown_process(Arc::new(process.clone()), &fast_policy())
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Wait(ProcessError::Other(ref m)) if m == "no child"));
        assert_eq!(process.kill_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_process_is_killed() {
        let process = FakeProcess::new().with_delay(Duration::from_secs(30));

        let err = shutdown_process(Arc::new(process.clone()), &fast_policy())
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Timeout));
        assert_eq!(process.signals(), vec![ProcessSignal::Interrupt]);
        assert_eq!(process.kill_count(), 1);
        assert_eq!(process.waits_completed(), 1);
    }

    #[tokio::test]
    async fn test_kill_failure_is_reported() {
        let process = FakeProcess::new()
            .with_delay(Duration::from_secs(30))
            .with_kill_error("permission denied");

        let err = shutdown_process(Arc::new(process.clone()), &fast_policy())
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::KillAfterTimeout(_)));
        assert_eq!(process.kill_count(), 1);
    }

    #[tokio::test]
    async fn test_unreaped_process_does_not_leak_wait_task() {
        let process = Arc::new(
            FakeProcess::new()
                .with_delay(Duration::from_secs(30))
                .with_ignored_kill(),
        );

        let err = shutdown_process(process.clone(), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
        assert_eq!(process.kill_count(), 1);

        // the aborted wait task drops its handle on the process
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(Arc::strong_count(&process), 1);
        assert_eq!(process.waits_completed(), 0);
    }

    #[tokio::test]
    async fn test_kill_failure_does_not_leak_wait_task() {
        let process = Arc::new(
            FakeProcess::new()
                .with_delay(Duration::from_secs(30))
                .with_kill_error("permission denied"),
        );

        shutdown_process(process.clone(), &fast_policy())
            .await
            .unwrap_err();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(Arc::strong_count(&process), 1);
    }

    #[tokio::test]
    async fn test_signal_failure_returns_immediately() {
        let process = FakeProcess::new()
            .with_delay(Duration::from_secs(30))
            .with_signal_error("no such process");

        let started = tokio::time::Instant::now();
        let err = shutdown_process(Arc::new(process.clone()), &fast_policy())
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Signal(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(process.kill_count(), 0);
    }

    #[tokio::test]
    async fn test_already_exited_process_returns_its_status() {
        let process = FakeProcess::new().with_exited();

        let status = shutdown_process(Arc::new(process.clone()), &fast_policy())
            .await
            .unwrap();

        assert_eq!(status, ProcessStatus::Exited(0));
        assert_eq!(process.kill_count(), 0);
    }

    #[tokio::test]
    async fn test_configured_signal_is_sent() {
        let process = FakeProcess::new();
        let policy = fast_policy().with_signal(ProcessSignal::Terminate);

        shutdown_process(Arc::new(process.clone()), &policy)
            .await
            .unwrap();

        assert_eq!(process.signals(), vec![ProcessSignal::Terminate]);
    }

    #[tokio::test]
    async fn test_close_channel_closes_streams_then_process() {
        let reader = CloseProbe::new();
        let writer = CloseProbe::new();
        let process = FakeProcess::new();

        let status = close_channel(
            Duplex::new(reader.clone(), writer.clone()),
            Arc::new(process.clone()),
            &fast_policy(),
        )
        .await
        .unwrap();

        assert_eq!(status, ProcessStatus::Exited(0));
        assert_eq!(reader.close_count(), 1);
        assert_eq!(writer.close_count(), 1);
        assert_eq!(process.signals().len(), 1);
        assert_eq!(process.kill_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_failure_still_signals_process() {
        let process = FakeProcess::new();

        let err = close_channel(
            Duplex::new(CloseProbe::new(), CloseProbe::failing("write")),
            Arc::new(process.clone()),
            &fast_policy(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ChannelError::StreamClose(_)));
        assert_eq!(process.signals(), vec![ProcessSignal::Interrupt]);
    }

    #[tokio::test]
    async fn test_process_error_wins_over_stream_error() {
        let process = FakeProcess::new().with_signal_error("gone");

        let err = close_channel(
            Duplex::new(CloseProbe::failing("read"), CloseProbe::new()),
            Arc::new(process.clone()),
            &fast_policy(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ChannelError::Signal(_)));
    }
}
