use std::convert::Infallible;
use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::config::{RelayConfig, SinkConfig};
use crate::mailbox::frame::FrameAssembler;
use crate::mailbox::registers::MailboxPort;
use crate::mailbox::sink::{ConnectProgress, ConnectionState, FileSink, OutputSink};
use crate::mailbox::RelayError;

const SPINNER: &[u8] = b"-/|\\";

/// Mutable state of a relay session that is not part of the framing.
#[derive(Debug, Clone)]
pub struct RelayContext {
    heartbeat_deadline: Instant,
    spinner: usize,
    retry_held: bool,
}

impl RelayContext {
    fn new(now: Instant) -> Self {
        Self {
            heartbeat_deadline: now,
            spinner: 0,
            retry_held: false,
        }
    }

    /// When the next heartbeat is due.
    pub fn heartbeat_deadline(&self) -> Instant {
        self.heartbeat_deadline
    }

    /// The current idle indicator character.
    pub fn spinner(&self) -> char {
        char::from(SPINNER[self.spinner])
    }

    /// Whether connect attempts are suspended until the next heartbeat.
    pub fn retry_held(&self) -> bool {
        self.retry_held
    }
}

/// Forwards the debug mailbox stream of a device to an [`OutputSink`].
///
/// The session is driven by [`RelaySession::tick`], either from [`RelaySession::run`] or
/// from an outer loop. Nothing in a tick blocks for longer than the connect timeout of the
/// sink.
pub struct RelaySession<P> {
    mailbox: P,
    sink: Box<dyn OutputSink>,
    dump: Option<Box<dyn Write>>,
    assembler: FrameAssembler,
    heartbeat: Duration,
    poll_interval: Duration,
    context: RelayContext,
}

impl<P: MailboxPort> RelaySession<P> {
    /// Relay from `mailbox` to `sink`, using the timing and buffer settings of `config`.
    ///
    /// The sink and dump settings of `config` are not used, see
    /// [`RelaySession::from_config`].
    pub fn new(mailbox: P, sink: Box<dyn OutputSink>, config: &RelayConfig) -> Self {
        Self {
            mailbox,
            sink,
            dump: None,
            assembler: FrameAssembler::new(config.buffer_limit()),
            heartbeat: config.heartbeat,
            poll_interval: config.poll_interval,
            context: RelayContext::new(Instant::now()),
        }
    }

    /// Create the sink and the dump file described by `config`.
    ///
    /// A dump file that cannot be created is reported and skipped.
    pub fn from_config(mailbox: P, config: &RelayConfig) -> Result<Self, RelayError> {
        let sink: Box<dyn OutputSink> = match &config.sink {
            SinkConfig::File { path: None } => Box::new(FileSink::stdout()),
            SinkConfig::File { path: Some(path) } => Box::new(FileSink::create(path)?),
            SinkConfig::Tcp { host, port } => tcp_sink(host, *port, config.connect_timeout)?,
        };

        let mut session = Self::new(mailbox, sink, config);
        if let Some(path) = &config.dump {
            match File::create(path) {
                Ok(file) => session = session.with_dump(Box::new(file)),
                Err(error) => {
                    tracing::warn!("Unable to open dump file {}: {}", path.display(), error)
                }
            }
        }
        Ok(session)
    }

    /// Also write every received byte to `dump`, as soon as it is read.
    pub fn with_dump(mut self, dump: Box<dyn Write>) -> Self {
        self.dump = Some(dump);
        self
    }

    /// Whether received bytes are still copied to a dump.
    pub fn dumping(&self) -> bool {
        self.dump.is_some()
    }

    /// The session context.
    pub fn context(&self) -> &RelayContext {
        &self.context
    }

    /// Received bytes the sink has not taken yet.
    pub fn pending(&self) -> &[u8] {
        self.assembler.pending()
    }

    /// One iteration of the relay loop.
    ///
    /// Returns whether any word was read from the mailbox.
    pub fn tick(&mut self, now: Instant) -> Result<bool, RelayError> {
        if now >= self.context.heartbeat_deadline {
            self.heartbeat(now);
        }

        self.flush();

        let mut busy = false;
        // Stop reading while the buffer is full, the device holds on to the data.
        while !self.assembler.is_full() {
            let control = self.mailbox.read_rx_control()?;
            if !control.ready() {
                break;
            }
            let data = self.mailbox.read_rx_data()?;
            busy = true;

            let received = self.assembler.accept(control, data);
            if received.frame_started {
                self.context.heartbeat_deadline = now + self.heartbeat;
            }
            self.tee(received.bytes());
            if received.flush.is_some() {
                self.flush();
            }
        }

        Ok(busy)
    }

    /// Relay until the mailbox cannot be read anymore.
    pub fn run(mut self) -> Result<Infallible, RelayError> {
        loop {
            if !self.tick(Instant::now())? {
                std::thread::sleep(self.poll_interval);
            }
        }
    }

    fn heartbeat(&mut self, now: Instant) {
        self.context.heartbeat_deadline = now + self.heartbeat;
        self.context.retry_held = false;
        self.context.spinner = (self.context.spinner + 1) % SPINNER.len();
        tracing::trace!("{}", self.context.spinner());

        if self.sink.state() != ConnectionState::Connected {
            self.connect();
        }
    }

    fn connect(&mut self) -> bool {
        if self.context.retry_held {
            return false;
        }
        match self.sink.connect() {
            ConnectProgress::Ready => true,
            ConnectProgress::Wait => false,
            ConnectProgress::Retry => {
                self.context.retry_held = true;
                false
            }
        }
    }

    fn flush(&mut self) {
        while !self.assembler.pending().is_empty() {
            if !self.connect() {
                return;
            }
            let sent = self.sink.send(self.assembler.pending());
            if sent == 0 {
                return;
            }
            self.assembler.consume(sent);
        }
    }

    fn tee(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let Some(dump) = self.dump.as_mut() else {
            return;
        };

        let result = dump.write_all(bytes).and_then(|()| dump.flush());
        if let Err(error) = result {
            tracing::warn!("Writing the dump failed, disabling it: {}", error);
            self.dump = None;
        }
    }
}

#[cfg(unix)]
fn tcp_sink(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<Box<dyn OutputSink>, RelayError> {
    use crate::mailbox::socket::{SocketSink, TcpTransport};

    let transport = TcpTransport::new(host, port)?;
    Ok(Box::new(SocketSink::new(transport, connect_timeout)))
}

#[cfg(not(unix))]
fn tcp_sink(
    _host: &str,
    _port: u16,
    _connect_timeout: Duration,
) -> Result<Box<dyn OutputSink>, RelayError> {
    Err(RelayError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "TCP output is only supported on unix hosts",
    )))
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::{self, Write};
    use std::path::PathBuf;
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;

    use super::RelaySession;
    use crate::config::{RelayConfig, SinkConfig};
    use crate::mailbox::registers::{SecApMailbox, SEC_AP_RXCTL};
    use crate::mailbox::sink::{ConnectProgress, ConnectionState, OutputSink};
    use crate::test::MockAp;

    #[derive(Debug, Default)]
    struct Recorded {
        sent: Vec<u8>,
        sends: Vec<usize>,
        connects: usize,
        connected: bool,
        progress: VecDeque<ConnectProgress>,
        limits: VecDeque<usize>,
        blocked: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Rc<RefCell<Recorded>>);

    impl OutputSink for RecordingSink {
        fn connect(&mut self) -> ConnectProgress {
            let mut recorded = self.0.borrow_mut();
            recorded.connects += 1;
            let progress = recorded
                .progress
                .pop_front()
                .unwrap_or(ConnectProgress::Ready);
            recorded.connected = progress == ConnectProgress::Ready;
            progress
        }

        fn send(&mut self, data: &[u8]) -> usize {
            let mut recorded = self.0.borrow_mut();
            if recorded.blocked {
                return 0;
            }
            let limit = recorded.limits.pop_front().unwrap_or(usize::MAX);
            let sent = data.len().min(limit);
            recorded.sent.extend_from_slice(&data[..sent]);
            recorded.sends.push(sent);
            sent
        }

        fn state(&self) -> ConnectionState {
            if self.0.borrow().connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Closed
            }
        }
    }

    #[derive(Clone, Default)]
    struct ChunkWriter(Rc<RefCell<Vec<Vec<u8>>>>);

    impl Write for ChunkWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::Other.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn session(
        ap: MockAp,
        config: &RelayConfig,
    ) -> (RelaySession<SecApMailbox<MockAp>>, RecordingSink) {
        let sink = RecordingSink::default();
        let session = RelaySession::new(SecApMailbox::new(ap), Box::new(sink.clone()), config);
        (session, sink)
    }

    #[test]
    fn frame_is_forwarded_and_dumped() {
        let (session, sink) = session(
            MockAp::with_frames(&[b"0123456789"]),
            &RelayConfig::default(),
        );
        let dump = ChunkWriter::default();
        let mut session = session.with_dump(Box::new(dump.clone()));

        assert!(session.tick(Instant::now()).unwrap());

        assert_eq!(sink.0.borrow().sent, b"0123456789");
        assert_eq!(sink.0.borrow().sends, [10]);
        assert_eq!(
            *dump.0.borrow(),
            vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]
        );
        assert!(session.pending().is_empty());
    }

    #[test]
    fn idle_tick_reads_nothing() {
        let (mut session, sink) = session(MockAp::default(), &RelayConfig::default());

        assert!(!session.tick(Instant::now()).unwrap());
        assert!(sink.0.borrow().sent.is_empty());
    }

    #[test]
    fn partial_sends_keep_the_remainder_in_order() {
        let (mut session, sink) = session(
            MockAp::with_frames(&[b"0123456789"]),
            &RelayConfig::default(),
        );
        sink.0.borrow_mut().limits.extend([3, 0]);
        let start = Instant::now();

        session.tick(start).unwrap();
        assert_eq!(sink.0.borrow().sent, b"012");
        assert_eq!(session.pending(), b"3456789");

        session.tick(start).unwrap();
        assert_eq!(sink.0.borrow().sent, b"0123456789");
        assert!(session.pending().is_empty());
    }

    #[test]
    fn failed_connect_waits_for_the_heartbeat() {
        let config = RelayConfig::default();
        let (mut session, sink) = session(MockAp::with_frames(&[b"0123456789"]), &config);
        sink.0.borrow_mut().progress.push_back(ConnectProgress::Retry);
        let start = Instant::now();

        session.tick(start).unwrap();
        assert!(session.context().retry_held());
        assert_eq!(sink.0.borrow().connects, 1);
        assert_eq!(session.pending(), b"0123456789");

        session.tick(start + Duration::from_millis(100)).unwrap();
        assert_eq!(sink.0.borrow().connects, 1);

        session.tick(start + config.heartbeat).unwrap();
        assert!(!session.context().retry_held());
        assert_eq!(sink.0.borrow().sent, b"0123456789");
    }

    #[test]
    fn waiting_connect_is_retried_on_the_next_flush() {
        let (mut session, sink) = session(MockAp::with_frames(&[b"abc"]), &RelayConfig::default());
        sink.0
            .borrow_mut()
            .progress
            .extend([ConnectProgress::Wait, ConnectProgress::Wait]);
        let start = Instant::now();

        session.tick(start).unwrap();
        assert_eq!(session.pending(), b"abc");
        assert!(!session.context().retry_held());

        session.tick(start).unwrap();
        assert_eq!(sink.0.borrow().sent, b"abc");
    }

    #[test]
    fn heartbeat_advances_the_spinner() {
        let config = RelayConfig::default();
        let (mut session, _sink) = session(MockAp::default(), &config);
        let start = Instant::now();

        session.tick(start).unwrap();
        assert_eq!(session.context().spinner(), '/');
        session.tick(start + config.heartbeat).unwrap();
        assert_eq!(session.context().spinner(), '|');
        session.tick(start + config.heartbeat * 2).unwrap();
        assert_eq!(session.context().spinner(), '\\');
        session.tick(start + config.heartbeat * 3).unwrap();
        assert_eq!(session.context().spinner(), '-');
        assert_eq!(
            session.context().heartbeat_deadline(),
            start + config.heartbeat * 4
        );
    }

    #[test]
    fn frame_start_postpones_the_heartbeat() {
        let config = RelayConfig::default();
        let mut ap = MockAp::default();
        ap.push(SEC_AP_RXCTL, 0);
        ap.push_frame(b"x");
        let (mut session, _sink) = session(ap, &config);
        let start = Instant::now();

        session.tick(start).unwrap();
        assert_eq!(session.context().heartbeat_deadline(), start + config.heartbeat);

        let later = start + Duration::from_millis(300);
        session.tick(later).unwrap();
        assert_eq!(session.context().heartbeat_deadline(), later + config.heartbeat);
    }

    #[test]
    fn full_buffer_stops_reading() {
        let config = RelayConfig {
            buffer_capacity: 12,
            buffer_reserve: 4,
            ..RelayConfig::default()
        };
        let frame = b"abcdefghijklmnopqrst";
        let (mut session, sink) = session(MockAp::with_frames(&[frame]), &config);
        sink.0.borrow_mut().blocked = true;
        let start = Instant::now();

        session.tick(start).unwrap();
        assert_eq!(session.pending(), b"abcdefgh");
        assert_eq!(session.mailbox.get_ref().remaining(SEC_AP_RXCTL), 3);

        sink.0.borrow_mut().blocked = false;
        session.tick(start).unwrap();
        assert_eq!(sink.0.borrow().sent, frame);
        assert_eq!(sink.0.borrow().sends, [8, 8, 4]);
    }

    #[test]
    fn empty_frame_sends_nothing() {
        let (session, sink) = session(MockAp::with_frames(&[b"", b"ab"]), &RelayConfig::default());
        let dump = ChunkWriter::default();
        let mut session = session.with_dump(Box::new(dump.clone()));

        session.tick(Instant::now()).unwrap();

        assert_eq!(sink.0.borrow().sends, [2]);
        assert_eq!(*dump.0.borrow(), vec![b"ab".to_vec()]);
    }

    #[test]
    fn failing_dump_is_disabled() {
        let (session, sink) = session(
            MockAp::with_frames(&[b"0123456789"]),
            &RelayConfig::default(),
        );
        let mut session = session.with_dump(Box::new(FailingWriter));

        session.tick(Instant::now()).unwrap();

        assert!(!session.dumping());
        assert_eq!(sink.0.borrow().sent, b"0123456789");
    }

    #[test]
    fn dump_open_failure_does_not_stop_the_relay() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.txt");
        let config = RelayConfig {
            sink: SinkConfig::File {
                path: Some(output.clone()),
            },
            dump: Some(dir.path().join("missing").join("dump.bin")),
            ..RelayConfig::default()
        };

        let mut session =
            RelaySession::from_config(SecApMailbox::new(MockAp::with_frames(&[b"hi"])), &config)
                .unwrap();
        assert!(!session.dumping());

        session.tick(Instant::now()).unwrap();
        drop(session);
        assert_eq!(std::fs::read(&output).unwrap(), b"hi");
    }

    #[test]
    fn dump_file_receives_the_raw_stream() {
        let dir = tempfile::tempdir().unwrap();
        let dump: PathBuf = dir.path().join("dump.bin");
        let config = RelayConfig {
            sink: SinkConfig::File {
                path: Some(dir.path().join("out.txt")),
            },
            dump: Some(dump.clone()),
            ..RelayConfig::default()
        };

        let mut session = RelaySession::from_config(
            SecApMailbox::new(MockAp::with_frames(&[b"first", b"", b"second"])),
            &config,
        )
        .unwrap();
        session.tick(Instant::now()).unwrap();
        drop(session);

        assert_eq!(std::fs::read(&dump).unwrap(), b"firstsecond");
    }

    #[cfg(unix)]
    #[test]
    fn tcp_sink_needs_an_ip_address() {
        let config = RelayConfig {
            sink: SinkConfig::Tcp {
                host: "localhost".to_string(),
                port: 4000,
            },
            ..RelayConfig::default()
        };

        let result = RelaySession::from_config(SecApMailbox::new(MockAp::default()), &config);

        assert!(matches!(
            result,
            Err(crate::mailbox::RelayError::InvalidAddress(_))
        ));
    }
}
