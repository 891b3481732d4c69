use futures::StreamExt;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{BytesCodec, FramedRead};

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Sync + Send>;

/// Shared async writer that receives a child's error output.
pub struct SinkWriter(Arc<Mutex<BoxedWriter>>);

impl Clone for SinkWriter {
    fn clone(&self) -> Self {
        SinkWriter(self.0.clone())
    }
}

impl SinkWriter {
    pub fn new(t: BoxedWriter) -> SinkWriter {
        SinkWriter(Arc::new(Mutex::new(t)))
    }

    pub fn inner(&self) -> Arc<Mutex<BoxedWriter>> {
        self.0.clone()
    }

    pub fn ptr_eq(&self, other: &SinkWriter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SinkWriter(..)")
    }
}

/// Where a child's stderr goes. The bytes are never interpreted.
#[derive(Clone, Debug, Default, derive_more::From)]
pub enum StderrSink {
    /// Share this process's stderr
    #[default]
    Inherit,
    /// Discard
    Null,
    /// Pipe into the given writer
    #[from]
    Writer(SinkWriter),
}

impl StderrSink {
    pub fn writer<T: AsyncWrite + Unpin + Sync + Send + 'static>(t: T) -> Self {
        StderrSink::Writer(SinkWriter::new(Box::new(t)))
    }

    pub fn stdio(&self) -> Stdio {
        match self {
            StderrSink::Inherit => Stdio::inherit(),
            StderrSink::Null => Stdio::null(),
            StderrSink::Writer(_) => Stdio::piped(),
        }
    }
}

/// Copy everything from `io` into `out` until EOF, flushing after each chunk.
pub async fn pump<A: AsyncRead + Unpin>(io: A, out: SinkWriter) -> tokio::io::Result<()> {
    let mut frames = FramedRead::with_capacity(io, BytesCodec::new(), 1024);
    let inner = out.inner();

    while let Some(frame) = frames.next().await {
        let chunk = frame?;
        let mut writer = inner.lock().await;
        writer.write_all(&chunk).await?;
        writer.flush().await?;
    }

    Ok(())
}
