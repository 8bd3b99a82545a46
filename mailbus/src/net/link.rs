//! Stream links to a broker.
//!
//! A [`Link`] moves whole frames: each frame is a 4-byte little-endian length
//! followed by that many body bytes. A [`Connector`] opens a link and runs the
//! hello exchange before handing it over, so every link a client sees has
//! already been welcomed by the broker.
//!
//! Links are shared between the writer (send, shutdown) and the reader
//! (recv). After [`Link::shutdown`] every call returns an error instead of
//! touching a dead socket.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use super::endpoint::BrokerAddress;
use crate::control::handshake::client_handshake;
use crate::control::types::{ClientHello, ConnectError};
use crate::data::packet::DEFAULT_MAX_PACKET_SIZE;

/// Size of the length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Errors from moving frames over a link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link I/O failed: {0}")]
    Io(#[from] io::Error),
    /// Peer closed the stream, or the link was shut down locally.
    #[error("link closed")]
    Closed,
    /// Nothing arrived within the receive timeout.
    #[error("no frame within the receive timeout")]
    Idle,
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
}

/// A connected, welcomed broker session.
pub trait Link: Send + Sync + 'static {
    /// Sends one frame body.
    ///
    /// # Errors
    ///
    /// Any error means the link is no longer usable for sending.
    fn send(&self, frame: &[u8]) -> Result<(), LinkError>;

    /// Receives one frame body.
    ///
    /// # Errors
    ///
    /// [`LinkError::Idle`] if nothing arrived within the receive timeout;
    /// anything else means the link is dead.
    fn recv(&self) -> Result<Vec<u8>, LinkError>;

    /// Tears the link down, unblocking any in-flight `recv`.
    fn shutdown(&self);

    /// Whether the link can still carry frames.
    ///
    /// Links that learn of their own death on `recv` report it here so the
    /// sending side can reconnect without waiting for a send to fail.
    fn is_open(&self) -> bool {
        true
    }
}

/// Opens links to a broker.
pub trait Connector: Send + Sync + 'static {
    type Link: Link;

    /// Connects to `address` and completes the hello exchange.
    ///
    /// # Errors
    ///
    /// See [`ConnectError::is_fatal`] for which failures are worth retrying.
    fn connect(
        &self,
        address: &BrokerAddress,
        hello: &ClientHello,
    ) -> Result<Self::Link, ConnectError>;
}

/// Writes one length-prefixed frame.
///
/// # Errors
///
/// Returns [`LinkError::FrameTooLarge`] without writing anything if `body`
/// exceeds `max_len`.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8], max_len: usize) -> Result<(), LinkError> {
    let too_large = || LinkError::FrameTooLarge {
        len: body.len(),
        max: max_len,
    };
    if body.len() > max_len {
        return Err(too_large());
    }
    let len = u32::try_from(body.len()).map_err(|_| too_large())?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// A read timeout before the first header byte is [`LinkError::Idle`]. Once
/// a frame has started, timeouts are ridden out until it is complete.
///
/// # Errors
///
/// Returns [`LinkError::Closed`] on end of stream and
/// [`LinkError::FrameTooLarge`] if the announced length exceeds `max_len`.
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, LinkError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    fill(reader, &mut header, true)?;

    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(LinkError::FrameTooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    fill(reader, &mut body, false)?;
    Ok(body)
}

fn fill<R: Read>(reader: &mut R, buf: &mut [u8], idle_at_start: bool) -> Result<(), LinkError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(LinkError::Closed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => {
                if idle_at_start && filled == 0 {
                    return Err(LinkError::Idle);
                }
            }
            Err(e) => return Err(LinkError::Io(e)),
        }
    }
    Ok(())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Opens [`TcpLink`]s.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    handshake_timeout: Duration,
    receive_timeout: Duration,
    max_frame: usize,
    socket_buffer_size: Option<usize>,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            receive_timeout: Duration::from_millis(500),
            max_frame: DEFAULT_MAX_PACKET_SIZE,
            socket_buffer_size: None,
        }
    }
}

impl TcpConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// How long `recv` waits before reporting [`LinkError::Idle`].
    #[must_use]
    pub const fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_max_frame(mut self, max: usize) -> Self {
        self.max_frame = max;
        self
    }

    /// Kernel send and receive buffer size; system default if unset.
    #[must_use]
    pub const fn with_socket_buffer_size(mut self, size: Option<usize>) -> Self {
        self.socket_buffer_size = size;
        self
    }

    fn open(&self, address: &BrokerAddress) -> Result<TcpStream, ConnectError> {
        let mut last = io::Error::new(ErrorKind::NotFound, format!("no route to {address}"));
        for addr in address.resolve().map_err(ConnectError::Unreachable)? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last = e,
            }
        }
        Err(ConnectError::Unreachable(last))
    }

    fn tune(&self, stream: &TcpStream) -> io::Result<()> {
        // std has no buffer-size setters.
        rustix::net::sockopt::set_tcp_nodelay(stream, true)?;
        if let Some(size) = self.socket_buffer_size {
            rustix::net::sockopt::set_socket_send_buffer_size(stream, size)?;
            rustix::net::sockopt::set_socket_recv_buffer_size(stream, size)?;
        }
        Ok(())
    }
}

impl Connector for TcpConnector {
    type Link = TcpLink;

    fn connect(
        &self,
        address: &BrokerAddress,
        hello: &ClientHello,
    ) -> Result<TcpLink, ConnectError> {
        let stream = self.open(address)?;
        self.tune(&stream).map_err(LinkError::from)?;

        stream
            .set_read_timeout(Some(self.handshake_timeout))
            .map_err(LinkError::from)?;
        client_handshake(&mut &stream, hello, self.max_frame)?;
        stream
            .set_read_timeout(Some(self.receive_timeout))
            .map_err(LinkError::from)?;

        let link = TcpLink::new(stream, self.max_frame).map_err(LinkError::from)?;
        Ok(link)
    }
}

/// A TCP session to a broker.
///
/// Send and receive use separate handles on the same socket so a blocked
/// receive never holds up the writer.
pub struct TcpLink {
    stream: TcpStream,
    rx: Mutex<TcpStream>,
    tx: Mutex<TcpStream>,
    max_frame: usize,
    closed: AtomicBool,
}

impl TcpLink {
    /// Wraps an already welcomed stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket handle cannot be duplicated.
    pub fn new(stream: TcpStream, max_frame: usize) -> io::Result<Self> {
        Ok(Self {
            rx: Mutex::new(stream.try_clone()?),
            tx: Mutex::new(stream.try_clone()?),
            stream,
            max_frame,
            closed: AtomicBool::new(false),
        })
    }

    /// Address of the broker end, if the socket still knows it.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Link for TcpLink {
    fn send(&self, frame: &[u8]) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        let mut tx = self.tx.lock();
        write_frame(&mut *tx, frame, self.max_frame).inspect_err(|e| {
            if !matches!(e, LinkError::FrameTooLarge { .. }) {
                self.mark_closed();
            }
        })
    }

    fn recv(&self) -> Result<Vec<u8>, LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }
        let mut rx = self.rx.lock();
        // Past a failed read the stream position is unknown; report dead
        // from then on so the next send triggers a reconnect.
        read_frame(&mut *rx, self.max_frame).inspect_err(|e| {
            if !matches!(e, LinkError::Idle) {
                self.mark_closed();
            }
        })
    }

    fn shutdown(&self) {
        self.mark_closed();
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }
}

impl std::fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLink")
            .field("peer", &self.peer_addr())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread;

    use crate::control::handshake::{broker_read_hello, broker_reply};
    use crate::control::types::BrokerReply;

    /// Reader that reports a timeout before yielding its bytes.
    struct Stalling {
        timeouts: usize,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for Stalling {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.timeouts > 0 {
                self.timeouts -= 1;
                return Err(ErrorKind::WouldBlock.into());
            }
            // One byte at a time to exercise partial reads.
            let n = buf.len().min(1);
            self.inner.read(&mut buf[..n])
        }
    }

    #[test]
    fn frame_survives_a_byte_stream() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"hello", 64).unwrap();
        write_frame(&mut wire, b"", 64).unwrap();
        assert_eq!(&wire[..4], &5u32.to_le_bytes());

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor, 64).unwrap(), b"hello");
        assert!(read_frame(&mut cursor, 64).unwrap().is_empty());
        assert!(matches!(read_frame(&mut cursor, 64), Err(LinkError::Closed)));
    }

    #[test]
    fn oversized_frame_is_not_written() {
        let mut wire = Vec::new();
        let err = write_frame(&mut wire, &[0u8; 10], 9).unwrap_err();
        assert!(matches!(err, LinkError::FrameTooLarge { len: 10, max: 9 }));
        assert!(wire.is_empty());
    }

    #[test]
    fn oversized_announcement_is_refused() {
        let mut cursor = Cursor::new(1000u32.to_le_bytes().to_vec());
        assert!(matches!(
            read_frame(&mut cursor, 999),
            Err(LinkError::FrameTooLarge { len: 1000, max: 999 })
        ));
    }

    #[test]
    fn timeout_before_header_is_idle() {
        let mut reader = Stalling {
            timeouts: 1,
            inner: Cursor::new(Vec::new()),
        };
        assert!(matches!(read_frame(&mut reader, 64), Err(LinkError::Idle)));
    }

    #[test]
    fn timeout_mid_frame_is_ridden_out() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abc", 64).unwrap();

        // First byte arrives, then the stream stalls a few times.
        struct Split {
            first: bool,
            stalls: usize,
            inner: Cursor<Vec<u8>>,
        }
        impl Read for Split {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.first {
                    self.first = false;
                    return self.inner.read(&mut buf[..1]);
                }
                if self.stalls > 0 {
                    self.stalls -= 1;
                    return Err(ErrorKind::TimedOut.into());
                }
                self.inner.read(buf)
            }
        }

        let mut reader = Split {
            first: true,
            stalls: 3,
            inner: Cursor::new(wire),
        };
        assert_eq!(read_frame(&mut reader, 64).unwrap(), b"abc");
    }

    #[test]
    fn byte_at_a_time_reads_complete() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"slow", 64).unwrap();
        let mut reader = Stalling {
            timeouts: 0,
            inner: Cursor::new(wire),
        };
        assert_eq!(read_frame(&mut reader, 64).unwrap(), b"slow");
    }

    fn spawn_broker(reply: BrokerReply) -> (SocketAddr, thread::JoinHandle<Option<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().ok()?;
            broker_read_hello(&mut stream, DEFAULT_MAX_PACKET_SIZE).ok()?;
            broker_reply(&mut stream, &reply, DEFAULT_MAX_PACKET_SIZE).ok()?;
            Some(stream)
        });
        (addr, handle)
    }

    #[test]
    fn tcp_link_moves_frames_both_ways() {
        let (addr, broker) = spawn_broker(BrokerReply::Welcome);
        let connector = TcpConnector::new().with_receive_timeout(Duration::from_millis(50));
        let link = connector
            .connect(&BrokerAddress::from(addr), &ClientHello::new("link-test"))
            .unwrap();
        let mut broker_end = broker.join().unwrap().unwrap();

        link.send(b"up").unwrap();
        assert_eq!(read_frame(&mut broker_end, 64).unwrap(), b"up");

        write_frame(&mut broker_end, b"down", 64).unwrap();
        assert_eq!(link.recv().unwrap(), b"down");

        assert!(matches!(link.recv(), Err(LinkError::Idle)));
    }

    #[test]
    fn shutdown_fails_later_calls() {
        let (addr, broker) = spawn_broker(BrokerReply::Welcome);
        let link = TcpConnector::new()
            .connect(&BrokerAddress::from(addr), &ClientHello::new("link-test"))
            .unwrap();
        let _broker_end = broker.join().unwrap();

        link.shutdown();
        assert!(!link.is_open());
        assert!(matches!(link.send(b"x"), Err(LinkError::Closed)));
        assert!(matches!(link.recv(), Err(LinkError::Closed)));
    }

    #[test]
    fn shutdown_unblocks_pending_recv() {
        let (addr, broker) = spawn_broker(BrokerReply::Welcome);
        let link = std::sync::Arc::new(
            TcpConnector::new()
                .with_receive_timeout(Duration::from_secs(30))
                .connect(&BrokerAddress::from(addr), &ClientHello::new("link-test"))
                .unwrap(),
        );
        let _broker_end = broker.join().unwrap();

        let receiver = std::sync::Arc::clone(&link);
        let pending = thread::spawn(move || receiver.recv());
        thread::sleep(Duration::from_millis(50));
        link.shutdown();

        assert!(pending.join().unwrap().is_err());
    }

    #[test]
    fn peer_hangup_closes_the_link() {
        let (addr, broker) = spawn_broker(BrokerReply::Welcome);
        let link = TcpConnector::new()
            .connect(&BrokerAddress::from(addr), &ClientHello::new("link-test"))
            .unwrap();
        drop(broker.join().unwrap());

        assert!(matches!(link.recv(), Err(LinkError::Closed)));
        assert!(!link.is_open());
    }

    #[test]
    fn rejection_is_fatal() {
        let (addr, broker) = spawn_broker(BrokerReply::Rejected {
            reason: "name taken".into(),
        });
        let err = TcpConnector::new()
            .connect(&BrokerAddress::from(addr), &ClientHello::new("dup"))
            .unwrap_err();
        let _ = broker.join();

        assert!(matches!(&err, ConnectError::Rejected(reason) if reason == "name taken"));
        assert!(err.is_fatal());
    }

    #[test]
    fn refused_connection_is_transient() {
        // Bind then drop to get a port with nobody listening.
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let err = TcpConnector::new()
            .with_connect_timeout(Duration::from_millis(200))
            .connect(&BrokerAddress::from(addr), &ClientHello::new("nobody"))
            .unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable(_)));
        assert!(!err.is_fatal());
    }
}
