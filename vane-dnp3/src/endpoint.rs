//! Connections, the connection manager and remote endpoints.
//!
//! A [`Connection`] is a byte pipe with timed receives; TCP, UDP, serial
//! and an in-memory loopback (for tests) all implement it. The
//! [`ConnectionManager`] owns listeners and outgoing connects, and the
//! [`RemoteEndpoint`] owns the associations of one remote origin.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::association::Association;
use crate::config::RemoteConfig;
use crate::error::ServiceError;

const READ_CHUNK: usize = 4096;
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// A byte pipe carrying link frames.
pub trait Connection: Send {
    /// Send raw bytes.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Receive raw bytes, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the timeout elapsed; an error means the
    /// connection is gone.
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Peer description for logging.
    fn peer(&self) -> String;
}

/// TCP stream connection.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpConnection {
    /// Wrap an accepted or connected stream.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, peer })
    }
}

impl Connection for TcpConnection {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.stream.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0u8; READ_CHUNK];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            )),
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

/// UDP connection; the peer may be learned from the first datagram.
#[derive(Debug)]
pub struct UdpConnection {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpConnection {
    /// Bound socket talking to a known peer.
    pub fn connect(peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        Ok(Self {
            socket,
            peer: Some(peer),
        })
    }

    /// Listening socket; the peer is learned from the first datagram.
    pub fn listen(port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        Ok(Self { socket, peer: None })
    }
}

impl Connection for UdpConnection {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.peer {
            Some(peer) => self.socket.send_to(bytes, peer).map(|_| ()),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no datagram peer yet",
            )),
        }
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = vec![0u8; READ_CHUNK];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if self.peer.is_none() {
                    self.peer = Some(from);
                }
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn peer(&self) -> String {
        self.peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "udp:unbound".to_owned())
    }
}

/// Serial port connection over the OS device file.
///
/// Framing is identical to the network transports. A reader thread turns
/// the blocking device reads into timed receives; the configured speed is
/// recorded, the line discipline is left to the platform setup.
pub struct SerialConnection {
    path: String,
    writer: std::fs::File,
    incoming: mpsc::Receiver<io::Result<Vec<u8>>>,
    stop: Arc<AtomicBool>,
}

impl SerialConnection {
    /// Open a serial device path.
    pub fn open(path: &str, _speed: u32) -> io::Result<Self> {
        let writer = OpenOptions::new().read(true).write(true).open(path)?;
        let reader = writer.try_clone()?;
        let (tx, incoming) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("dnp3-serial-{path}"))
            .spawn(move || serial_reader(reader, tx, stop_flag))?;
        Ok(Self {
            path: path.to_owned(),
            writer,
            incoming,
            stop,
        })
    }
}

fn serial_reader(
    mut reader: std::fs::File,
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    while !stop.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port closed",
                )));
                break;
            }
            Ok(n) => {
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

impl Connection for SerialConnection {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match self.incoming.recv_timeout(timeout) {
            Ok(result) => result.map(Some),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial reader stopped",
            )),
        }
    }

    fn peer(&self) -> String {
        self.path.clone()
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// In-memory connection used by tests and local loops.
#[derive(Debug)]
pub struct LoopbackConnection {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    name: &'static str,
}

/// A pair of connected loopback ends.
pub fn loopback_pair() -> (LoopbackConnection, LoopbackConnection) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    (
        LoopbackConnection {
            tx: a_tx,
            rx: a_rx,
            name: "loopback-a",
        },
        LoopbackConnection {
            tx: b_tx,
            rx: b_rx,
            name: "loopback-b",
        },
    )
}

impl Connection for LoopbackConnection {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback peer gone"))
    }

    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback peer gone",
            )),
        }
    }

    fn peer(&self) -> String {
        self.name.to_owned()
    }
}

/// Owns listening sockets and outgoing connects.
pub struct ConnectionManager {
    stop: Arc<AtomicBool>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Fresh manager.
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Listen for TCP connections; each accepted stream is handed to the
    /// handler on the accept worker. Returns the bound port.
    pub fn listen_tcp(
        &self,
        port: u16,
        handler: impl Fn(TcpConnection) + Send + 'static,
    ) -> io::Result<u16> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let bound = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;
        let stop = Arc::clone(&self.stop);
        let worker = thread::Builder::new()
            .name(format!("dnp3-accept-{bound}"))
            .spawn(move || loop {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                match listener.accept() {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, "accepted DNP3 connection");
                        let _ = stream.set_nonblocking(false);
                        match TcpConnection::new(stream) {
                            Ok(connection) => handler(connection),
                            Err(error) => {
                                tracing::warn!(%error, "failed to install connection")
                            }
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "accept failed");
                        return;
                    }
                }
            })?;
        self.workers.lock().push(worker);
        Ok(bound)
    }

    /// Open a UDP listener connection on a port.
    pub fn listen_udp(&self, port: u16) -> io::Result<UdpConnection> {
        UdpConnection::listen(port)
    }

    /// Connect to a TCP remote within the timeout.
    pub fn connect_tcp(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<TcpConnection, ServiceError> {
        let targets: Vec<SocketAddr> = address
            .to_socket_addrs()
            .map_err(|e| ServiceError::ConnectionFailed(e.to_string()))?
            .collect();
        let mut last = None;
        for target in targets {
            match TcpStream::connect_timeout(&target, timeout) {
                Ok(stream) => {
                    return TcpConnection::new(stream)
                        .map_err(|e| ServiceError::ConnectionFailed(e.to_string()))
                }
                Err(e) => last = Some(e),
            }
        }
        Err(ServiceError::ConnectionFailed(
            last.map(|e| e.to_string())
                .unwrap_or_else(|| "no address resolved".to_owned()),
        ))
    }

    /// Stop the accept workers and wait for them.
    pub fn close(&self) {
        self.stop.store(true, Ordering::Relaxed);
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }
}

/// One remote origin: its configuration and association map.
pub struct RemoteEndpoint {
    config: RemoteConfig,
    associations: Mutex<HashMap<u32, Association>>,
    master_side: bool,
}

impl RemoteEndpoint {
    /// Endpoint over a remote configuration.
    pub fn new(config: RemoteConfig, master_side: bool) -> Self {
        Self {
            config,
            associations: Mutex::new(HashMap::new()),
            master_side,
        }
    }

    /// The endpoint configuration.
    pub const fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Run a closure over the `(local, remote)` association, creating it
    /// on first use.
    pub fn with_association<R>(
        &self,
        local: u16,
        remote: u16,
        f: impl FnOnce(&mut Association) -> R,
    ) -> R {
        let mut associations = self.associations.lock();
        let association = associations
            .entry(Association::key(local, remote))
            .or_insert_with(|| {
                Association::new(local, remote, self.master_side, self.config.max_fragment_size)
            });
        f(association)
    }

    /// Number of live associations.
    pub fn association_count(&self) -> usize {
        self.associations.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_round_trips() {
        let (mut a, mut b) = loopback_pair();
        a.send(&[1, 2, 3]).unwrap();
        assert_eq!(
            b.recv(Duration::from_millis(100)).unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(b.recv(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn loopback_reports_closed_peer() {
        let (mut a, b) = loopback_pair();
        drop(b);
        assert!(a.send(&[0]).is_err());
    }

    #[test]
    fn endpoint_creates_associations_lazily() {
        let endpoint = RemoteEndpoint::new(RemoteConfig::default(), true);
        assert_eq!(endpoint.association_count(), 0);
        let seq = endpoint.with_association(1, 1024, |a| a.next_solicited());
        assert_eq!(seq, 0);
        assert_eq!(endpoint.association_count(), 1);
        let seq = endpoint.with_association(1, 1024, |a| a.next_solicited());
        assert_eq!(seq, 1);
    }

    #[test]
    fn tcp_accept_and_connect() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::channel();
        let port = manager
            .listen_tcp(0, move |connection| {
                let _ = tx.send(connection.peer());
            })
            .unwrap();
        let mut client = manager
            .connect_tcp(&format!("127.0.0.1:{port}"), Duration::from_secs(5))
            .unwrap();
        let peer = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!peer.is_empty());
        client.send(&[5]).unwrap();
        manager.close();
    }
}
