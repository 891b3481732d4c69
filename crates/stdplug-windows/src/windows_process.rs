use async_trait::async_trait;
use stdplug_core::{
    ChannelConfig, ChannelError, ChildReaper, ManagedProcess, ProcessError, ProcessId,
    ProcessSignal, ProcessStatus, Spawned, Spawner, StderrSink, command_for, start_command,
};
use tokio::process::{ChildStdin, ChildStdout};
use tracing::{debug, warn};
use windows::Win32::System::Threading::CREATE_NO_WINDOW;

/// A child process on Windows.
///
/// There is no interrupt to deliver to a console-less child, so
/// [`ProcessSignal::Interrupt`] is rejected and the shutdown sequence falls
/// straight through to its error path. [`ProcessSignal::Terminate`] maps to
/// `TerminateProcess`.
pub struct WindowsProcess {
    reaper: ChildReaper,
}

impl WindowsProcess {
    pub fn new(reaper: ChildReaper) -> Self {
        Self { reaper }
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.reaper.pid()
    }
}

#[async_trait]
impl ManagedProcess for WindowsProcess {
    async fn wait(&self) -> Result<ProcessStatus, ProcessError> {
        self.reaper.wait().await
    }

    async fn signal(&self, signal: ProcessSignal) -> Result<(), ProcessError> {
        if self.reaper.has_exited() {
            return Err(ProcessError::AlreadyExited);
        }

        match signal {
            ProcessSignal::Interrupt => {
                warn!(pid = ?self.pid(), "Interrupt is not supported on Windows");
                Err(ProcessError::UnsupportedSignal(signal))
            }
            ProcessSignal::Terminate => {
                self.reaper.kill().await?;
                debug!(pid = ?self.pid(), "Terminated Windows process");
                Ok(())
            }
        }
    }

    async fn kill(&self) -> Result<(), ProcessError> {
        self.reaper.kill().await
    }
}

/// Starts plugin processes without a console window
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsSpawner;

impl Spawner for WindowsSpawner {
    type Reader = ChildStdout;
    type Writer = ChildStdin;
    type Process = WindowsProcess;

    fn spawn(
        &self,
        config: &ChannelConfig,
        stderr: StderrSink,
    ) -> Result<Spawned<ChildStdout, ChildStdin, WindowsProcess>, ChannelError> {
        let mut cmd = command_for(config);
        cmd.creation_flags(CREATE_NO_WINDOW.0);

        let (child, stdout, stdin) = start_command(cmd, config, stderr)?;

        Ok(Spawned {
            stdout,
            stdin,
            process: WindowsProcess::new(ChildReaper::spawn(child)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use stdplug_core::{ChannelFactory, ShutdownPolicy};

    fn config(signal: ProcessSignal) -> ChannelConfig {
        let mut config = ChannelConfig::new("cmd", ["/C", "ping -n 30 127.0.0.1 > NUL"]);
        config.shutdown = ShutdownPolicy::new()
            .with_grace_period(Duration::from_millis(500))
            .with_signal(signal);
        config
    }

    #[tokio::test]
    async fn test_interrupt_is_unsupported() {
        let channel = ChannelFactory::new(WindowsSpawner)
            .open(&config(ProcessSignal::Interrupt), StderrSink::Null)
            .unwrap();

        let err = channel.stop().await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Signal(ProcessError::UnsupportedSignal(ProcessSignal::Interrupt))
        ));
    }

    #[tokio::test]
    async fn test_terminate_stops_child() {
        let channel = ChannelFactory::new(WindowsSpawner)
            .open(&config(ProcessSignal::Terminate), StderrSink::Null)
            .unwrap();

        let status = channel.stop().await.unwrap();
        assert!(!status.success());
    }
}
