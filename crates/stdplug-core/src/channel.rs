use crate::config::{ChannelConfig, ShutdownPolicy};
use crate::duplex::{CloseRead, CloseWrite, Conn, Duplex};
use crate::error::ChannelError;
use crate::process::{ManagedProcess, ProcessStatus};
use crate::shutdown::close_channel;
use crate::stdio::{StderrSink, pump};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// The pieces of a freshly started child
pub struct Spawned<R, W, P> {
    pub stdout: R,
    pub stdin: W,
    pub process: P,
}

/// Strategy that starts a child process.
///
/// Injected into [`ChannelFactory`] so that tests can substitute in-memory
/// pipes and a fake process for a real spawn.
pub trait Spawner: Send + Sync {
    type Reader: CloseRead + 'static;
    type Writer: CloseWrite + 'static;
    type Process: ManagedProcess;

    fn spawn(
        &self,
        config: &ChannelConfig,
        stderr: StderrSink,
    ) -> Result<Spawned<Self::Reader, Self::Writer, Self::Process>, ChannelError>;
}

/// Build the command for `config` with stdin and stdout piped.
pub fn command_for(config: &ChannelConfig) -> Command {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &config.working_directory {
        cmd.current_dir(dir);
    }

    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    cmd
}

/// Start `cmd` and take its pipes.
///
/// Either both pipes are returned with the running child, or the child is
/// killed and every pipe already taken is dropped.
pub fn start_command(
    mut cmd: Command,
    config: &ChannelConfig,
    stderr: StderrSink,
) -> Result<(Child, ChildStdout, ChildStdin), ChannelError> {
    cmd.stderr(stderr.stdio());

    let mut child = cmd.spawn().map_err(|source| ChannelError::Spawn {
        command: config.command.clone(),
        source,
    })?;

    let pipes = match (child.stdin.take(), child.stdout.take()) {
        (Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
        (None, _) => Err(ChannelError::PipeUnavailable("stdin")),
        (_, None) => Err(ChannelError::PipeUnavailable("stdout")),
    };
    let (stdin, stdout) = match pipes {
        Ok(pipes) => pipes,
        Err(e) => {
            if let Err(kill_err) = child.start_kill() {
                warn!(error = %kill_err, "Failed to kill child after pipe acquisition failed");
            }
            return Err(e);
        }
    };

    if let (StderrSink::Writer(sink), Some(child_stderr)) = (stderr, child.stderr.take()) {
        tokio::spawn(async move {
            if let Err(e) = pump(child_stderr, sink).await {
                debug!(error = %e, "Stopped forwarding child stderr");
            }
        });
    }

    info!(
        pid = ?child.id(),
        command = %config.command,
        args = ?config.args,
        "Spawned child process"
    );

    Ok((child, stdout, stdin))
}

/// A child process and the stream wired to its stdin/stdout.
///
/// Closing runs the graceful shutdown sequence exactly once.
pub struct SubprocessChannel<R, W, P> {
    stream: Duplex<R, W>,
    process: Arc<P>,
    policy: ShutdownPolicy,
}

impl<R, W, P> SubprocessChannel<R, W, P>
where
    R: CloseRead,
    W: CloseWrite,
    P: ManagedProcess,
{
    pub fn new(stream: Duplex<R, W>, process: Arc<P>, policy: ShutdownPolicy) -> Self {
        Self {
            stream,
            process,
            policy,
        }
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    pub fn policy(&self) -> &ShutdownPolicy {
        &self.policy
    }

    /// Close the stream and stop the child, returning its exit status.
    pub async fn stop(self) -> Result<ProcessStatus, ChannelError> {
        close_channel(self.stream, self.process, &self.policy).await
    }
}

#[async_trait]
impl<R, W, P> Conn for SubprocessChannel<R, W, P>
where
    R: CloseRead + 'static,
    W: CloseWrite + 'static,
    P: ManagedProcess,
{
    async fn close(self) -> Result<(), ChannelError> {
        let status = self.stop().await?;
        info!(%status, "Subprocess channel closed");
        Ok(())
    }
}

impl<R: AsyncRead + Unpin, W: Unpin, P> AsyncRead for SubprocessChannel<R, W, P> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl<R: Unpin, W: AsyncWrite + Unpin, P> AsyncWrite for SubprocessChannel<R, W, P> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Channel type produced by a given spawner
pub type ChannelOf<S> =
    SubprocessChannel<<S as Spawner>::Reader, <S as Spawner>::Writer, <S as Spawner>::Process>;

/// Opens subprocess channels with an injected [`Spawner`]
pub struct ChannelFactory<S> {
    spawner: S,
}

impl<S: Spawner> ChannelFactory<S> {
    pub fn new(spawner: S) -> Self {
        Self { spawner }
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Spawn `config.command` and wire its stdio into a channel.
    ///
    /// Nothing is returned on failure; whatever was acquired is released.
    pub fn open(
        &self,
        config: &ChannelConfig,
        stderr: impl Into<StderrSink>,
    ) -> Result<ChannelOf<S>, ChannelError> {
        config
            .shutdown
            .validate()
            .map_err(|e| ChannelError::ConfigurationError(e.to_string()))?;

        let Spawned {
            stdout,
            stdin,
            process,
        } = self.spawner.spawn(config, stderr.into())?;

        debug!(command = %config.command, "Opened subprocess channel");
        Ok(SubprocessChannel::new(
            Duplex::new(stdout, stdin),
            Arc::new(process),
            config.shutdown.clone(),
        ))
    }
}
