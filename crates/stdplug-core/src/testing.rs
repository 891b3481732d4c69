//! Deterministic doubles for the process and stream capabilities.

use crate::channel::{Spawned, Spawner};
use crate::config::ChannelConfig;
use crate::duplex::{CloseRead, CloseWrite, Duplex};
use crate::error::ChannelError;
use crate::process::{ManagedProcess, ProcessError, ProcessSignal, ProcessStatus};
use crate::stdio::StderrSink;
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::Notify;

#[derive(Default)]
struct FakeProcessInner {
    delay: Duration,
    wait_error: Option<String>,
    kill_error: Option<String>,
    signal_error: Option<String>,
    ignore_kill: bool,
    exited: bool,
    signals: Mutex<Vec<ProcessSignal>>,
    kills: AtomicUsize,
    waits_completed: AtomicUsize,
    killed: AtomicBool,
    kill_notify: Notify,
}

/// A process that exits `delay` after `wait` starts, or as soon as it is killed.
///
/// Clones share state so a test can keep one and hand the other to the code
/// under test.
#[derive(Clone, Default)]
pub struct FakeProcess(Arc<FakeProcessInner>);

impl FakeProcess {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(self, f: impl FnOnce(&mut FakeProcessInner)) -> Self {
        let mut inner = Arc::try_unwrap(self.0)
            .unwrap_or_else(|_| panic!("configure FakeProcess before cloning it"));
        f(&mut inner);
        Self(Arc::new(inner))
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.configure(|p| p.delay = delay)
    }

    pub fn with_wait_error(self, message: &str) -> Self {
        let message = message.to_string();
        self.configure(|p| p.wait_error = Some(message))
    }

    pub fn with_kill_error(self, message: &str) -> Self {
        let message = message.to_string();
        self.configure(|p| p.kill_error = Some(message))
    }

    pub fn with_signal_error(self, message: &str) -> Self {
        let message = message.to_string();
        self.configure(|p| p.signal_error = Some(message))
    }

    /// Accepts kills without ever exiting.
    pub fn with_ignored_kill(self) -> Self {
        self.configure(|p| p.ignore_kill = true)
    }

    /// Exits immediately and rejects signals as already exited.
    pub fn with_exited(self) -> Self {
        self.configure(|p| p.exited = true)
    }

    /// Signals received, in order
    pub fn signals(&self) -> Vec<ProcessSignal> {
        self.0.signals.lock().expect("signals lock").clone()
    }

    pub fn kill_count(&self) -> usize {
        self.0.kills.load(Ordering::SeqCst)
    }

    pub fn waits_completed(&self) -> usize {
        self.0.waits_completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    async fn wait(&self) -> Result<ProcessStatus, ProcessError> {
        tokio::select! {
            _ = tokio::time::sleep(self.0.delay) => {}
            _ = self.0.kill_notify.notified() => {}
        }
        self.0.waits_completed.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.0.wait_error {
            return Err(ProcessError::Other(message.clone()));
        }
        if self.0.killed.load(Ordering::SeqCst) {
            Ok(ProcessStatus::Signaled(9))
        } else {
            Ok(ProcessStatus::Exited(0))
        }
    }

    async fn signal(&self, signal: ProcessSignal) -> Result<(), ProcessError> {
        self.0.signals.lock().expect("signals lock").push(signal);
        if self.0.exited {
            return Err(ProcessError::AlreadyExited);
        }
        match &self.0.signal_error {
            Some(message) => Err(ProcessError::Other(message.clone())),
            None => Ok(()),
        }
    }

    async fn kill(&self) -> Result<(), ProcessError> {
        self.0.kills.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.0.kill_error {
            return Err(ProcessError::Other(message.clone()));
        }
        if self.0.ignore_kill {
            return Ok(());
        }
        self.0.killed.store(true, Ordering::SeqCst);
        self.0.kill_notify.notify_one();
        Ok(())
    }
}

/// Stream half that records closes and optionally fails them.
///
/// Reads return EOF and writes are discarded.
#[derive(Clone, Default)]
pub struct CloseProbe {
    closes: Arc<AtomicUsize>,
    error: Option<&'static str>,
}

impl CloseProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &'static str) -> Self {
        Self {
            closes: Arc::default(),
            error: Some(message),
        }
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record_close(&self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        match self.error {
            Some(message) => Err(io::Error::other(message)),
            None => Ok(()),
        }
    }
}

impl AsyncRead for CloseProbe {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for CloseProbe {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl CloseRead for CloseProbe {
    async fn close(self) -> io::Result<()> {
        self.record_close()
    }
}

#[async_trait]
impl CloseWrite for CloseProbe {
    async fn close(self) -> io::Result<()> {
        self.record_close()
    }
}

/// What a [`FakeSpawner`] was asked to start
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub command: String,
    pub args: Vec<String>,
    pub stderr: StderrSink,
}

type FakeSpawned = Spawned<DuplexStream, DuplexStream, FakeProcess>;

/// Spawner that hands out in-memory pipes instead of starting a process.
pub struct FakeSpawner {
    next: Mutex<Option<FakeSpawned>>,
    failure: Option<io::ErrorKind>,
    records: Mutex<Vec<SpawnRecord>>,
}

impl FakeSpawner {
    /// Build a spawner whose single child talks through the returned
    /// [`Duplex`]: what the parent writes arrives on its read side, what it
    /// writes arrives at the parent.
    pub fn pipes(process: FakeProcess) -> (Self, Duplex<DuplexStream, DuplexStream>) {
        let (parent_stdin, child_stdin) = tokio::io::duplex(64 * 1024);
        let (child_stdout, parent_stdout) = tokio::io::duplex(64 * 1024);

        let spawner = Self {
            next: Mutex::new(Some(Spawned {
                stdout: parent_stdout,
                stdin: parent_stdin,
                process,
            })),
            failure: None,
            records: Mutex::default(),
        };
        (spawner, Duplex::new(child_stdin, child_stdout))
    }

    /// A spawner whose every spawn fails with `kind`
    pub fn failing(kind: io::ErrorKind) -> Self {
        Self {
            next: Mutex::default(),
            failure: Some(kind),
            records: Mutex::default(),
        }
    }

    pub fn records(&self) -> Vec<SpawnRecord> {
        self.records.lock().expect("records lock").clone()
    }
}

impl Spawner for FakeSpawner {
    type Reader = DuplexStream;
    type Writer = DuplexStream;
    type Process = FakeProcess;

    fn spawn(&self, config: &ChannelConfig, stderr: StderrSink) -> Result<FakeSpawned, ChannelError> {
        self.records.lock().expect("records lock").push(SpawnRecord {
            command: config.command.clone(),
            args: config.args.clone(),
            stderr,
        });

        if let Some(kind) = self.failure {
            return Err(ChannelError::Spawn {
                command: config.command.clone(),
                source: io::Error::from(kind),
            });
        }

        self.next
            .lock()
            .expect("next lock")
            .take()
            .ok_or_else(|| ChannelError::Spawn {
                command: config.command.clone(),
                source: io::Error::other("fake spawner already used"),
            })
    }
}
