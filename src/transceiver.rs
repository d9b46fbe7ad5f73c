use std::net::SocketAddr;

use crate::error::Error;

/// A trait for sending and receiving datagrams.
///
/// Both the [`Server`](crate::Server) and [`Client`](crate::Client) use a statically dispatched
/// generic type `T: Transceiver`, so anything that can move datagrams can carry the protocol.
/// [`UdpTransport`](crate::UdpTransport) is the default implementation.
pub trait Transceiver {
    type IntoError: Into<Error>;
    /// Returns the local address of the socket (i.e. the address it is bound to).
    ///
    /// Servers use it to check that they are listed in a connect token.
    fn addr(&self) -> SocketAddr;
    /// Receives a datagram, if one is available.
    ///
    /// Should **NOT** block if no datagram is available.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::IntoError>;
    /// Sends a datagram to the specified address.
    ///
    /// Should **NOT** block if the datagram cannot be sent.
    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::IntoError>;
}
