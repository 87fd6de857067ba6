//! TCP listener and connector producing duplex transports
//!
//! [`TcpTransport`] binds a listener and hands every accepted socket over as
//! a [`TcpConnection`], ready for a connection's receive loop. The connect
//! side exists for clients, tools and tests.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use portside_core::transport::DuplexTransport;
use portside_core::Result;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Socket options applied at bind and accept time.
#[derive(Debug, Clone)]
pub struct TcpListenOptions {
    /// Disable Nagle's algorithm on accepted sockets.
    pub no_delay: bool,
    /// Enable `SO_KEEPALIVE` on the listening socket.
    pub keepalive: bool,
    /// Maximum length of the pending-connection queue.
    pub backlog: u32,
}

impl Default for TcpListenOptions {
    fn default() -> Self {
        Self {
            no_delay: true,
            keepalive: true,
            backlog: 1024,
        }
    }
}

/// TCP listener producing [`TcpConnection`] transports.
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    options: TcpListenOptions,
}

impl TcpTransport {
    /// Bind a listener on `addr` with default options.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with(addr, TcpListenOptions::default()).await
    }

    /// Bind a listener on `addr` with explicit socket options.
    pub async fn bind_with(addr: SocketAddr, options: TcpListenOptions) -> Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        if options.keepalive {
            socket.set_keepalive(true)?;
        }

        socket.bind(addr)?;
        let listener = socket.listen(options.backlog)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            options,
        })
    }

    /// Accept the next inbound socket.
    pub async fn accept(&self) -> Result<TcpConnection> {
        let (stream, _remote) = self.listener.accept().await?;

        if self.options.no_delay {
            stream.set_nodelay(true)?;
        }

        Ok(TcpConnection::from_stream(stream))
    }

    /// Open an outbound socket to `addr`, with Nagle disabled.
    pub async fn connect(addr: SocketAddr) -> Result<TcpConnection> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(TcpConnection::from_stream(stream))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// An established TCP socket usable as a connection transport.
///
/// Endpoint addresses are captured up front so they stay available after the
/// peer disappears mid-connection.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl TcpConnection {
    /// Wrap an already established socket.
    pub fn from_stream(stream: TcpStream) -> Self {
        let remote_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();

        Self {
            stream,
            remote_addr,
            local_addr,
        }
    }

    /// Consume the wrapper and return the underlying socket.
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }
}

impl DuplexTransport for TcpConnection {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn any_local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn options_default_to_server_friendly_values() {
        let options = TcpListenOptions::default();
        assert!(options.no_delay);
        assert!(options.keepalive);
        assert_eq!(options.backlog, 1024);
    }

    #[tokio::test]
    async fn accept_and_connect_pair_up() {
        let transport = TcpTransport::bind(any_local()).await.unwrap();
        let addr = transport.local_addr();

        let (server, client) = tokio::join!(transport.accept(), TcpTransport::connect(addr));
        let server = server.unwrap();
        let client = client.unwrap();

        assert_eq!(server.local_addr(), Some(addr));
        assert_eq!(client.remote_addr(), Some(addr));
        assert_eq!(server.remote_addr(), client.local_addr());
    }

    #[tokio::test]
    async fn bytes_flow_both_ways() {
        let transport = TcpTransport::bind(any_local()).await.unwrap();
        let addr = transport.local_addr();

        let (server, client) = tokio::join!(transport.accept(), TcpTransport::connect(addr));
        let mut server = server.unwrap();
        let mut client = client.unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn default_options_disable_nagle() {
        let transport = TcpTransport::bind(any_local()).await.unwrap();
        let addr = transport.local_addr();

        let (server, client) = tokio::join!(transport.accept(), TcpTransport::connect(addr));
        let server = server.unwrap().into_inner();
        let client = client.unwrap().into_inner();

        assert!(server.nodelay().unwrap());
        assert!(client.nodelay().unwrap());
    }

    #[tokio::test]
    async fn custom_options_leave_nagle_alone() {
        let options = TcpListenOptions {
            no_delay: false,
            keepalive: false,
            backlog: 16,
        };
        let transport = TcpTransport::bind_with(any_local(), options).await.unwrap();
        let addr = transport.local_addr();

        let (server, _client) = tokio::join!(transport.accept(), TcpTransport::connect(addr));
        let server = server.unwrap().into_inner();

        assert!(!server.nodelay().unwrap());
    }
}
