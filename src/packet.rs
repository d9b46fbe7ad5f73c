use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    bytes::Bytes,
    consts::{CONNECT_TOKEN_SIZE, MAX_PAYLOAD_SIZE},
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown packet kind: {0}")]
    InvalidKind(u8),
    #[error("packet kind {0:?} is never sealed by a session")]
    Unsealed(PacketKind),
    #[error("packet size {0} is invalid for its kind")]
    InvalidSize(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The prefix byte of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Request = 0,
    Accepted = 1,
    Denied = 2,
    KeepAlive = 3,
    Payload = 4,
    Disconnect = 5,
}

impl TryFrom<u8> for PacketKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Request,
            1 => Self::Accepted,
            2 => Self::Denied,
            3 => Self::KeepAlive,
            4 => Self::Payload,
            5 => Self::Disconnect,
            _ => return Err(Error::InvalidKind(value)),
        })
    }
}

/// The only unencrypted packet: the client's connect token, sent as is so the server can verify
/// its signature.
#[derive(Clone)]
pub struct RequestPacket {
    pub token: [u8; CONNECT_TOKEN_SIZE],
}

impl RequestPacket {
    pub const SIZE: usize = 1 + CONNECT_TOKEN_SIZE;

    pub fn create(token: [u8; CONNECT_TOKEN_SIZE]) -> Self {
        Self { token }
    }
    pub fn is_request(buf: &[u8]) -> bool {
        buf.first() == Some(&(PacketKind::Request as u8))
    }
    pub fn write(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(PacketKind::Request as u8);
        buf.extend_from_slice(&self.token);
        buf
    }
    pub fn read(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != Self::SIZE {
            return Err(Error::InvalidSize(buf.len()));
        }
        let kind = PacketKind::try_from(buf[0])?;
        if kind != PacketKind::Request {
            return Err(Error::InvalidKind(buf[0]));
        }
        let mut token = [0; CONNECT_TOKEN_SIZE];
        token.copy_from_slice(&buf[1..]);
        Ok(Self { token })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedPacket {
    pub client_index: u32,
    pub max_clients: u32,
}

impl Bytes for AcceptedPacket {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(self.client_index)?;
        writer.write_u32::<LittleEndian>(self.max_clients)?;
        Ok(())
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error> {
        Ok(Self {
            client_index: reader.read_u32::<LittleEndian>()?,
            max_clients: reader.read_u32::<LittleEndian>()?,
        })
    }
}

/// Packets sealed with a session key. See [`SessionChannel`](crate::SessionChannel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Accepted(AcceptedPacket),
    Denied,
    KeepAlive,
    Payload(Vec<u8>),
    Disconnect,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Accepted(_) => PacketKind::Accepted,
            Packet::Denied => PacketKind::Denied,
            Packet::KeepAlive => PacketKind::KeepAlive,
            Packet::Payload(_) => PacketKind::Payload,
            Packet::Disconnect => PacketKind::Disconnect,
        }
    }

    pub fn write_body(&self, writer: &mut impl Write) -> Result<(), Error> {
        match self {
            Packet::Accepted(pkt) => pkt.write_to(writer)?,
            Packet::Payload(buf) => {
                if buf.len() > MAX_PAYLOAD_SIZE {
                    return Err(Error::InvalidSize(buf.len()));
                }
                writer.write_all(buf)?
            }
            Packet::Denied | Packet::KeepAlive | Packet::Disconnect => {}
        }
        Ok(())
    }

    pub fn read_body(kind: PacketKind, body: &[u8]) -> Result<Self, Error> {
        let expect_empty = |pkt: Packet| {
            if body.is_empty() {
                Ok(pkt)
            } else {
                Err(Error::InvalidSize(body.len()))
            }
        };
        match kind {
            PacketKind::Request => Err(Error::Unsealed(kind)),
            PacketKind::Accepted => {
                if body.len() != 8 {
                    return Err(Error::InvalidSize(body.len()));
                }
                let mut reader = io::Cursor::new(body);
                Ok(Packet::Accepted(AcceptedPacket::read_from(&mut reader)?))
            }
            PacketKind::Payload => {
                if body.is_empty() || body.len() > MAX_PAYLOAD_SIZE {
                    return Err(Error::InvalidSize(body.len()));
                }
                let mut buf = Vec::with_capacity(body.len());
                io::Cursor::new(body).read_to_end(&mut buf)?;
                Ok(Packet::Payload(buf))
            }
            PacketKind::Denied => expect_empty(Packet::Denied),
            PacketKind::KeepAlive => expect_empty(Packet::KeepAlive),
            PacketKind::Disconnect => expect_empty(Packet::Disconnect),
        }
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Packet::Accepted(_) => write!(f, "connection accepted packet"),
            Packet::Denied => write!(f, "connection denied packet"),
            Packet::KeepAlive => write!(f, "keep-alive packet"),
            Packet::Payload(buf) => write!(f, "payload packet ({} bytes)", buf.len()),
            Packet::Disconnect => write!(f, "disconnect packet"),
        }
    }
}
