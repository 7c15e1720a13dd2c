use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Connection state of an output sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection. The next connect attempt starts from scratch.
    Closed,
    /// A socket was opened and the connect has to be started.
    Connecting,
    /// The connect is in progress, waiting for the socket to become writable.
    AwaitingWritable,
    /// Data can be sent.
    Connected,
}

/// The outcome of a connect attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectProgress {
    /// The sink is connected.
    Ready,
    /// Not connected yet. Trying again right away is fine.
    Wait,
    /// The attempt failed. The next attempt should wait for the next heartbeat.
    Retry,
}

/// Destination of the reassembled mailbox stream.
pub trait OutputSink {
    /// Advance the connection. Cheap if the sink is already connected.
    fn connect(&mut self) -> ConnectProgress;

    /// Send as much of `data` as possible without blocking and return the number of bytes
    /// taken. Failures are handled by the sink and reported as 0 bytes taken.
    fn send(&mut self, data: &[u8]) -> usize;

    /// The current connection state.
    fn state(&self) -> ConnectionState;
}

impl<T: OutputSink + ?Sized> OutputSink for Box<T> {
    fn connect(&mut self) -> ConnectProgress {
        (**self).connect()
    }

    fn send(&mut self, data: &[u8]) -> usize {
        (**self).send(data)
    }

    fn state(&self) -> ConnectionState {
        (**self).state()
    }
}

/// A sink writing to a file or stdout. It is always connected.
pub struct FileSink {
    writer: Box<dyn Write>,
    name: String,
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink").field("name", &self.name).finish()
    }
}

impl FileSink {
    /// Write to `writer`. `name` is only used for log messages.
    pub fn new(writer: Box<dyn Write>, name: impl Into<String>) -> Self {
        Self {
            writer,
            name: name.into(),
        }
    }

    /// Write to stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()), "stdout")
    }

    /// Create or truncate the file at `path`.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(file), path.display().to_string()))
    }
}

impl OutputSink for FileSink {
    fn connect(&mut self) -> ConnectProgress {
        ConnectProgress::Ready
    }

    fn send(&mut self, data: &[u8]) -> usize {
        let written = match self.writer.write(data) {
            Ok(written) => written,
            Err(error) => {
                tracing::warn!("Writing to {} failed: {}", self.name, error);
                return 0;
            }
        };
        if let Err(error) = self.writer.flush() {
            tracing::warn!("Flushing {} failed: {}", self.name, error);
        }
        written
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
}
