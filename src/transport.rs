//! Connection bootstrap for the session driver.
//!
//! Sessions only need a connected duplex byte stream. A `Transport` knows how
//! to bind a listener and open client connections for one endpoint:
//! - `UnixTransport`: Unix-domain stream socket at a filesystem path
//! - `TcpTransport`: TCP socket address
//! - `MemoryTransport`: in-process `tokio::io::duplex` pipes

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::debug;

/// Accepts inbound connections.
pub trait Listener {
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<Self::Stream>>;
}

/// Creates listeners and outbound connections for one endpoint.
pub trait Transport: Clone + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;
    type Listener: Listener<Stream = Self::Stream> + 'static;

    fn bind(&self) -> impl Future<Output = io::Result<Self::Listener>>;

    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>>;
}

/// Unix-domain stream sockets.
#[derive(Debug, Clone)]
pub struct UnixTransport {
    path: PathBuf,
}

impl UnixTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Listener for UnixListener {
    type Stream = UnixStream;

    async fn accept(&mut self) -> io::Result<UnixStream> {
        let (stream, _addr) = UnixListener::accept(self).await?;
        Ok(stream)
    }
}

impl Transport for UnixTransport {
    type Stream = UnixStream;
    type Listener = UnixListener;

    async fn bind(&self) -> io::Result<UnixListener> {
        // A socket file left by an earlier run makes bind fail.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        UnixListener::bind(&self.path)
    }

    async fn connect(&self) -> io::Result<UnixStream> {
        UnixStream::connect(&self.path).await
    }
}

/// TCP sockets.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

/// A bound TCP listener.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<TcpStream> {
        let (stream, addr) = self.listener.accept().await?;
        debug!(peer = %addr, "New connection");
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpAcceptor;

    async fn bind(&self) -> io::Result<TcpAcceptor> {
        let listener = TcpListener::bind(&self.addr).await?;
        Ok(TcpAcceptor { listener })
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// In-process transport over `tokio::io::duplex` pipes.
///
/// Each `connect` creates a pipe and hands the server half to the listener.
/// Only one listener may be bound per transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<DuplexStream>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<DuplexStream>>>>,
    pipe_capacity: usize,
}

impl MemoryTransport {
    pub fn new(pipe_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            pipe_capacity,
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(4 * 1024)
    }
}

/// Server side of a `MemoryTransport`.
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl Listener for MemoryListener {
    type Stream = DuplexStream;

    async fn accept(&mut self) -> io::Result<DuplexStream> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))
    }
}

impl Transport for MemoryTransport {
    type Stream = DuplexStream;
    type Listener = MemoryListener;

    async fn bind(&self) -> io::Result<MemoryListener> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "transport lock poisoned"))?
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "listener already bound"))?;
        Ok(MemoryListener { rx })
    }

    async fn connect(&self) -> io::Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(self.pipe_capacity);
        self.tx
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no listener"))?;
        Ok(client)
    }
}
