//! Connect token layout, signing and verification.
//!
//! A connect token is a fixed size, signed credential: the issuer writes the public fields,
//! the endpoint list, the client id, user data and the session keys into a zero padded
//! buffer of [`CONNECT_TOKEN_SIGNED_SIZE`] bytes and appends an Ed25519 signature over it.
//!
//! ```text
//! [application id]        (u64)
//! [creation timestamp]    (u64)
//! [expiration timestamp]  (u64)
//! [handshake timeout]     (u32)
//! [num endpoints]         (u8)  in [1, 32]
//! <for each endpoint>
//!     [address type]      (u8)  1 = IPv4, 2 = IPv6
//!     [port]              (u16)
//!     [address]           (4 or 16 bytes)
//! [client id]             (u64)
//! [user data]             (256 bytes)
//! [client to server key]  (32 bytes)
//! [server to client key]  (32 bytes)
//! <zero pad to 1050 bytes>
//! [signature]             (64 bytes)
//! ```
use std::{
    io::{self, Write},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{
    bytes::{read_array, Bytes},
    consts::{
        CONNECT_TOKEN_SIGNED_SIZE, CONNECT_TOKEN_SIZE, KEY_SIZE, MAX_ENDPOINTS, SIGNATURE_SIZE,
        USER_DATA_SIZE,
    },
    error::{Error, Result},
    keys::{KeyPair, PublicKey, SessionKeyPair},
};

/// Reasons a connect token is refused. All of them are detected before any network traffic.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed connect token")]
    Malformed,
    #[error("connect token signature is invalid")]
    SignatureInvalid,
    #[error("connect token has expired")]
    Expired,
    #[error("connect token is not valid yet")]
    NotYetValid,
    #[error("connect token was issued for a different application")]
    ApplicationMismatch,
}

/// The ordered list of server endpoints a connect token authorizes, between 1 and
/// [`MAX_ENDPOINTS`] entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints(Vec<SocketAddr>);

impl Endpoints {
    const IPV4: u8 = 1;
    const IPV6: u8 = 2;

    pub fn new(addrs: impl ToSocketAddrs) -> Result<Self> {
        let addrs = addrs.to_socket_addrs()?.collect::<Vec<_>>();
        if !(1..=MAX_ENDPOINTS).contains(&addrs.len()) {
            return Err(Error::InvalidEndpoints(addrs.len()));
        }
        Ok(Self(addrs))
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn get(&self, index: usize) -> Option<SocketAddr> {
        self.0.get(index).copied()
    }
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.0.contains(addr)
    }
    pub fn iter(&self) -> impl Iterator<Item = &SocketAddr> {
        self.0.iter()
    }
}

impl Bytes for Endpoints {
    fn write_to(&self, buf: &mut impl WriteBytesExt) -> std::result::Result<(), io::Error> {
        buf.write_u8(self.0.len() as u8)?;
        for addr in self.0.iter() {
            match addr {
                SocketAddr::V4(addr_v4) => {
                    buf.write_u8(Self::IPV4)?;
                    buf.write_u16::<LittleEndian>(addr_v4.port())?;
                    buf.write_all(&addr_v4.ip().octets())?;
                }
                SocketAddr::V6(addr_v6) => {
                    buf.write_u8(Self::IPV6)?;
                    buf.write_u16::<LittleEndian>(addr_v6.port())?;
                    buf.write_all(&addr_v6.ip().octets())?;
                }
            }
        }
        Ok(())
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> std::result::Result<Self, io::Error> {
        let len = reader.read_u8()? as usize;
        if !(1..=MAX_ENDPOINTS).contains(&len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("endpoint list length is out of range 1-{MAX_ENDPOINTS}: {len}"),
            ));
        }
        let mut addrs = Vec::with_capacity(len);
        for _ in 0..len {
            let addr_type = reader.read_u8()?;
            let port = reader.read_u16::<LittleEndian>()?;
            addrs.push(match addr_type {
                Self::IPV4 => SocketAddr::from((Ipv4Addr::from(read_array::<4>(reader)?), port)),
                Self::IPV6 => SocketAddr::from((Ipv6Addr::from(read_array::<16>(reader)?), port)),
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "invalid ip address type",
                    ))
                }
            });
        }
        Ok(Self(addrs))
    }
}

/// A decoded connect token.
///
/// Obtained either from [`TokenIssuer`](crate::TokenIssuer) (issuer side) or from
/// [`ConnectToken::decode_and_verify`] (client and server side). Only verified tokens are
/// ever handed to the handshake.
#[derive(Debug, Clone)]
pub struct ConnectToken {
    pub application_id: u64,
    pub creation_timestamp: u64,
    pub expiration_timestamp: u64,
    pub handshake_timeout_seconds: u32,
    pub endpoints: Endpoints,
    pub client_id: u64,
    pub user_data: [u8; USER_DATA_SIZE],
    pub session_keys: SessionKeyPair,
}

impl ConnectToken {
    /// Serializes the token and signs it with the issuer's secret key.
    pub fn encode(&self, key_pair: &KeyPair) -> Result<[u8; CONNECT_TOKEN_SIZE]> {
        if !(1..=MAX_ENDPOINTS).contains(&self.endpoints.len()) {
            return Err(Error::InvalidEndpoints(self.endpoints.len()));
        }
        let mut buf = [0u8; CONNECT_TOKEN_SIZE];
        let mut cursor = io::Cursor::new(&mut buf[..CONNECT_TOKEN_SIGNED_SIZE]);
        self.write_to(&mut cursor)?;
        let signature = key_pair.sign(&buf[..CONNECT_TOKEN_SIGNED_SIZE]);
        buf[CONNECT_TOKEN_SIGNED_SIZE..].copy_from_slice(&signature);
        Ok(buf)
    }

    /// Checks the signature, then the structure, the application id and the validity window.
    ///
    /// No field is trusted before the signature has been verified.
    pub fn decode_and_verify(
        bytes: &[u8],
        public_key: &PublicKey,
        application_id: u64,
        now: u64,
    ) -> std::result::Result<Self, TokenError> {
        if bytes.len() != CONNECT_TOKEN_SIZE {
            return Err(TokenError::Malformed);
        }
        let (signed, signature) = bytes.split_at(CONNECT_TOKEN_SIGNED_SIZE);
        let signature: &[u8; SIGNATURE_SIZE] =
            signature.try_into().map_err(|_| TokenError::Malformed)?;
        if !public_key.verify(signed, signature) {
            return Err(TokenError::SignatureInvalid);
        }
        let token = Self::read_from(&mut io::Cursor::new(signed)).map_err(|err| {
            log::debug!("failed to read signed connect token: {err}");
            TokenError::Malformed
        })?;
        if token.application_id != application_id {
            return Err(TokenError::ApplicationMismatch);
        }
        if now < token.creation_timestamp {
            return Err(TokenError::NotYetValid);
        }
        if now >= token.expiration_timestamp {
            return Err(TokenError::Expired);
        }
        Ok(token)
    }

    /// The signature trailing an encoded token. Every issued token carries a distinct one.
    pub fn signature(bytes: &[u8; CONNECT_TOKEN_SIZE]) -> [u8; SIGNATURE_SIZE] {
        let mut signature = [0; SIGNATURE_SIZE];
        signature.copy_from_slice(&bytes[CONNECT_TOKEN_SIGNED_SIZE..]);
        signature
    }
}

impl Bytes for ConnectToken {
    fn write_to(&self, buf: &mut impl WriteBytesExt) -> std::result::Result<(), io::Error> {
        buf.write_u64::<LittleEndian>(self.application_id)?;
        buf.write_u64::<LittleEndian>(self.creation_timestamp)?;
        buf.write_u64::<LittleEndian>(self.expiration_timestamp)?;
        buf.write_u32::<LittleEndian>(self.handshake_timeout_seconds)?;
        self.endpoints.write_to(buf)?;
        buf.write_u64::<LittleEndian>(self.client_id)?;
        buf.write_all(&self.user_data)?;
        buf.write_all(&self.session_keys.client_to_server_key)?;
        buf.write_all(&self.session_keys.server_to_client_key)?;
        Ok(())
    }

    fn read_from(reader: &mut impl ReadBytesExt) -> std::result::Result<Self, io::Error> {
        let application_id = reader.read_u64::<LittleEndian>()?;
        let creation_timestamp = reader.read_u64::<LittleEndian>()?;
        let expiration_timestamp = reader.read_u64::<LittleEndian>()?;
        let handshake_timeout_seconds = reader.read_u32::<LittleEndian>()?;
        let endpoints = Endpoints::read_from(reader)?;
        let client_id = reader.read_u64::<LittleEndian>()?;
        let user_data = read_array::<USER_DATA_SIZE>(reader)?;
        let client_to_server_key = read_array::<KEY_SIZE>(reader)?;
        let server_to_client_key = read_array::<KEY_SIZE>(reader)?;

        Ok(Self {
            application_id,
            creation_timestamp,
            expiration_timestamp,
            handshake_timeout_seconds,
            endpoints,
            client_id,
            user_data,
            session_keys: SessionKeyPair {
                client_to_server_key,
                server_to_client_key,
            },
        })
    }
}
