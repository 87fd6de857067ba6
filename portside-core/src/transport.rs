//! Transport abstraction for Portside
//!
//! A connection is driven over any duplex byte stream supplied by a
//! transport collaborator. TLS negotiation and proxy-protocol stripping are
//! that collaborator's business; by the time a stream reaches this crate it
//! speaks plain ordered bytes in both directions.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte stream a connection can be driven over.
///
/// The connection layer splits the stream into read and write halves with
/// [`tokio::io::split`] and reunites them on detach, so implementations must
/// be [`Unpin`]. Endpoint addresses are optional because not every transport
/// has them (in-memory pipes, datagram-backed virtual streams).
pub trait DuplexTransport: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {
    /// Address of the remote peer, when the transport has one.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Local address of this end, when the transport has one.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// In-memory pipes serve as virtual connections: bytes are injected by
/// whoever holds the other end of the pair.
impl DuplexTransport for tokio::io::DuplexStream {
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}
