//! Non-blocking TCP output of the relay.

use std::io;
use std::time::Duration;

use crate::mailbox::sink::{ConnectProgress, ConnectionState, OutputSink};

/// How a connect attempt started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectStart {
    /// The connection was established right away.
    Connected,
    /// The connection is being established in the background.
    InProgress,
}

/// The socket operations needed by [`ConnectionStateMachine`].
///
/// None of the methods may block, except [`SocketTransport::wait_writable`] for at most its
/// timeout.
pub trait SocketTransport {
    /// Open a new non-blocking socket.
    fn open(&mut self) -> io::Result<()>;

    /// Start connecting the socket opened by [`SocketTransport::open`].
    fn start_connect(&mut self) -> io::Result<ConnectStart>;

    /// Wait until the socket becomes writable. Returns `false` on timeout.
    fn wait_writable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Fetch and clear the pending socket error.
    fn take_error(&mut self) -> io::Result<Option<io::Error>>;

    /// Send without blocking.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Description of the remote end, for log messages.
    fn peer(&self) -> String;

    /// Close the socket. Does nothing if no socket is open.
    fn close(&mut self);
}

/// Result of a single transition of the [`ConnectionStateMachine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Another transition can be taken right away.
    Continue,
    /// The connect attempt ended for now.
    Done(ConnectProgress),
}

/// Drives a [`SocketTransport`] from closed to connected, one transition at a time.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    timeout: Duration,
}

impl ConnectionStateMachine {
    /// Create a closed state machine. `timeout` bounds each wait for a pending connection.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Closed,
            timeout,
        }
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Take one transition from the current state.
    pub fn step(&mut self, transport: &mut impl SocketTransport) -> Step {
        match self.state {
            ConnectionState::Closed => match transport.open() {
                Ok(()) => {
                    self.state = ConnectionState::Connecting;
                    Step::Continue
                }
                Err(error) => self.fail(transport, "open socket", error),
            },
            ConnectionState::Connecting => match transport.start_connect() {
                Ok(ConnectStart::Connected) => self.connected(transport),
                Ok(ConnectStart::InProgress) => {
                    self.state = ConnectionState::AwaitingWritable;
                    Step::Done(ConnectProgress::Wait)
                }
                Err(error) => self.fail(transport, "connect", error),
            },
            ConnectionState::AwaitingWritable => match transport.wait_writable(self.timeout) {
                Ok(true) => match transport.take_error() {
                    Ok(None) => self.connected(transport),
                    Ok(Some(error)) | Err(error) => self.fail(transport, "connect", error),
                },
                Ok(false) => {
                    tracing::debug!("Connection to {} timed out", transport.peer());
                    self.disconnect(transport);
                    Step::Done(ConnectProgress::Wait)
                }
                Err(error) => self.fail(transport, "wait for connection", error),
            },
            ConnectionState::Connected => Step::Done(ConnectProgress::Ready),
        }
    }

    /// Take transitions until the attempt ends.
    pub fn drive(&mut self, transport: &mut impl SocketTransport) -> ConnectProgress {
        loop {
            if let Step::Done(progress) = self.step(transport) {
                return progress;
            }
        }
    }

    /// Close the socket and go back to [`ConnectionState::Closed`].
    pub fn disconnect(&mut self, transport: &mut impl SocketTransport) {
        transport.close();
        self.state = ConnectionState::Closed;
    }

    fn connected(&mut self, transport: &mut impl SocketTransport) -> Step {
        tracing::info!("Connected to {}", transport.peer());
        self.state = ConnectionState::Connected;
        Step::Done(ConnectProgress::Ready)
    }

    fn fail(
        &mut self,
        transport: &mut impl SocketTransport,
        action: &str,
        error: io::Error,
    ) -> Step {
        tracing::debug!("Failed to {} to {}: {}", action, transport.peer(), error);
        self.disconnect(transport);
        Step::Done(ConnectProgress::Retry)
    }
}

/// An [`OutputSink`] sending to a socket.
#[derive(Debug)]
pub struct SocketSink<T> {
    transport: T,
    machine: ConnectionStateMachine,
}

impl<T: SocketTransport> SocketSink<T> {
    /// Create a sink that is connected on the first [`OutputSink::connect`] call.
    pub fn new(transport: T, connect_timeout: Duration) -> Self {
        Self {
            transport,
            machine: ConnectionStateMachine::new(connect_timeout),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: SocketTransport> OutputSink for SocketSink<T> {
    fn connect(&mut self) -> ConnectProgress {
        self.machine.drive(&mut self.transport)
    }

    fn send(&mut self, data: &[u8]) -> usize {
        if self.machine.state() != ConnectionState::Connected {
            return 0;
        }

        match self.transport.send(data) {
            Ok(sent) => sent,
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => 0,
            Err(error) => {
                tracing::warn!("Closed connection to {}: {}", self.transport.peer(), error);
                self.machine.disconnect(&mut self.transport);
                0
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.machine.state()
    }
}

#[cfg(unix)]
pub use self::tcp::TcpTransport;

#[cfg(unix)]
mod tcp {
    use std::io::{self, Write};
    use std::net::{IpAddr, SocketAddr, TcpStream};
    use std::os::fd::{AsFd, AsRawFd};
    use std::time::Duration;

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags};
    use nix::sys::socket::{
        connect, socket, AddressFamily, SockFlag, SockType, SockaddrIn, SockaddrIn6,
    };

    use super::{ConnectStart, SocketTransport};
    use crate::mailbox::RelayError;

    /// A TCP client socket.
    #[derive(Debug)]
    pub struct TcpTransport {
        address: SocketAddr,
        stream: Option<TcpStream>,
    }

    impl TcpTransport {
        /// Connect to `host`, which has to be an IPv4 or IPv6 address.
        pub fn new(host: &str, port: u16) -> Result<Self, RelayError> {
            let ip: IpAddr = host
                .parse()
                .map_err(|_| RelayError::InvalidAddress(format!("{host}:{port}")))?;

            Ok(Self {
                address: SocketAddr::new(ip, port),
                stream: None,
            })
        }

        /// The address of the server.
        pub fn address(&self) -> SocketAddr {
            self.address
        }

        fn stream(&self) -> io::Result<&TcpStream> {
            self.stream
                .as_ref()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
        }
    }

    impl SocketTransport for TcpTransport {
        fn open(&mut self) -> io::Result<()> {
            let family = match self.address {
                SocketAddr::V4(_) => AddressFamily::Inet,
                SocketAddr::V6(_) => AddressFamily::Inet6,
            };
            let fd = socket(family, SockType::Stream, SockFlag::empty(), None)?;
            let stream = TcpStream::from(fd);
            stream.set_nonblocking(true)?;
            self.stream = Some(stream);
            Ok(())
        }

        fn start_connect(&mut self) -> io::Result<ConnectStart> {
            let fd = self.stream()?.as_raw_fd();
            let result = match self.address {
                SocketAddr::V4(address) => connect(fd, &SockaddrIn::from(address)),
                SocketAddr::V6(address) => connect(fd, &SockaddrIn6::from(address)),
            };

            match result {
                Ok(()) => Ok(ConnectStart::Connected),
                Err(Errno::EINPROGRESS) => Ok(ConnectStart::InProgress),
                Err(errno) => Err(errno.into()),
            }
        }

        fn wait_writable(&mut self, timeout: Duration) -> io::Result<bool> {
            let stream = self.stream()?;
            let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
            let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLOUT)];

            if poll(&mut fds, millis)? == 0 {
                return Ok(false);
            }
            Ok(fds[0].revents().is_some_and(|events| {
                events.intersects(PollFlags::POLLOUT | PollFlags::POLLERR | PollFlags::POLLHUP)
            }))
        }

        fn take_error(&mut self) -> io::Result<Option<io::Error>> {
            self.stream()?.take_error()
        }

        fn send(&mut self, data: &[u8]) -> io::Result<usize> {
            match &mut self.stream {
                Some(stream) => stream.write(data),
                None => Err(io::ErrorKind::NotConnected.into()),
            }
        }

        fn peer(&self) -> String {
            self.address.to_string()
        }

        fn close(&mut self) {
            self.stream = None;
        }
    }

}
