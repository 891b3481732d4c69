use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use stdplug_core::{
    ChannelConfig, ChannelError, ChildReaper, ManagedProcess, ProcessError, ProcessId,
    ProcessSignal, ProcessStatus, Spawned, Spawner, StderrSink, command_for, start_command,
};
use tokio::process::{ChildStdin, ChildStdout};
use tracing::debug;

/// A child process signalled through `kill(2)`
pub struct UnixProcess {
    reaper: ChildReaper,
}

impl UnixProcess {
    pub fn new(reaper: ChildReaper) -> Self {
        Self { reaper }
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.reaper.pid()
    }
}

fn to_nix(signal: ProcessSignal) -> Signal {
    match signal {
        ProcessSignal::Interrupt => Signal::SIGINT,
        ProcessSignal::Terminate => Signal::SIGTERM,
    }
}

#[async_trait]
impl ManagedProcess for UnixProcess {
    async fn wait(&self) -> Result<ProcessStatus, ProcessError> {
        self.reaper.wait().await
    }

    async fn signal(&self, signal: ProcessSignal) -> Result<(), ProcessError> {
        self.reaper
            .signal(Box::new(move |pid: ProcessId| {
                match signal::kill(NixPid::from_raw(pid as i32), to_nix(signal)) {
                    Ok(()) => {
                        debug!(pid, %signal, "Sent signal to Unix process");
                        Ok(())
                    }
                    Err(Errno::ESRCH) => Err(ProcessError::AlreadyExited),
                    Err(e) => Err(ProcessError::SignalFailed {
                        pid,
                        signal,
                        reason: e.to_string(),
                    }),
                }
            }))
            .await
    }

    async fn kill(&self) -> Result<(), ProcessError> {
        self.reaper.kill().await
    }
}

/// Starts plugin processes with `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSpawner;

impl Spawner for UnixSpawner {
    type Reader = ChildStdout;
    type Writer = ChildStdin;
    type Process = UnixProcess;

    fn spawn(
        &self,
        config: &ChannelConfig,
        stderr: StderrSink,
    ) -> Result<Spawned<ChildStdout, ChildStdin, UnixProcess>, ChannelError> {
        let (child, stdout, stdin) = start_command(command_for(config), config, stderr)?;

        Ok(Spawned {
            stdout,
            stdin,
            process: UnixProcess::new(ChildReaper::spawn(child)),
        })
    }
}
