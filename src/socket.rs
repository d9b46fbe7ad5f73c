use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::consts::{SOCKET_RECV_BUF_SIZE, SOCKET_SEND_BUF_SIZE};
use crate::transceiver::Transceiver;

#[derive(thiserror::Error, Debug)]
#[error("udp socket error: {0}")]
pub struct Error(#[from] std::io::Error);

pub type Result<T> = std::result::Result<T, Error>;

/// A non-blocking UDP socket with enlarged OS buffers.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub fn new(addr: impl ToSocketAddrs) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses found")
        })?;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }
        socket.set_send_buffer_size(SOCKET_SEND_BUF_SIZE)?;
        socket.set_recv_buffer_size(SOCKET_RECV_BUF_SIZE)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;
        Ok(Self { socket, local_addr })
    }
}

impl Transceiver for UdpTransport {
    type IntoError = Error;

    fn addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, addr)) if len > 0 => Ok(Some((len, addr))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        match self.socket.send_to(buf, addr) {
            Ok(len) => Ok(len),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_send_recv() {
        let a = UdpTransport::new("127.0.0.1:0").unwrap();
        let b = UdpTransport::new("127.0.0.1:0").unwrap();
        assert_ne!(a.addr().port(), 0);

        let mut buf = [0u8; 16];
        assert!(b.recv(&mut buf).unwrap().is_none());

        a.send(b"ping", b.addr()).unwrap();
        let mut received = None;
        for _ in 0..100 {
            received = b.recv(&mut buf).unwrap();
            if received.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (len, from) = received.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, a.addr());
    }
}
