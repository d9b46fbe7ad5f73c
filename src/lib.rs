//! # cute-net
//!
//! Secure connections over UDP for games and other real-time applications.
//!
//! A trusted backend hands out signed [connect tokens](ConnectToken) with a [`TokenIssuer`].
//! A [`Client`] verifies its token against the issuer's [`PublicKey`], then connects to one of the
//! servers listed in it. Once the [`Server`] accepts, every packet in either direction is
//! encrypted with the session keys from the token and checked against a replay window.
//!
//! Both ends are driven by the caller: call `update(dt, now)` at a steady rate and drain
//! `recv()`. Nothing blocks and nothing spawns threads.
//!
//! ```
//! use cute_net::{Client, ClientConfig, KeyPair, Server, ServerConfig, TokenIssuer};
//!
//! let issuer = TokenIssuer::new(0x11223344, KeyPair::generate().unwrap());
//! let public_key = issuer.key_pair().public_key();
//!
//! let mut server = Server::new("127.0.0.1:0", ServerConfig::new(0x11223344, public_key)).unwrap();
//! let now = cute_net::time_now_secs().unwrap();
//! let token = issuer.token(5, server.addr()).generate(now).unwrap();
//!
//! let mut client = Client::new(ClientConfig::new(0x11223344, public_key)).unwrap();
//! client.connect(&token).unwrap();
//! for _ in 0..100 {
//!     let now = cute_net::time_now_secs().unwrap();
//!     client.update(0.1, now).unwrap();
//!     server.update(0.1, now);
//!     if client.is_connected() {
//!         break;
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

mod bytes;
mod consts;
mod crypto;
mod error;
mod free_list;
mod issuer;
mod keys;
mod packet;
mod replay;
mod session;
mod socket;
mod time;
mod transceiver;

#[cfg(test)]
mod simulator;

pub mod client;
pub mod server;
pub mod token;

pub use crate::client::{state_to_string, Client, ClientConfig, ClientState, ConnectionFailure};
pub use crate::consts::{
    CONNECT_TOKEN_SIGNED_SIZE, CONNECT_TOKEN_SIZE, DEFAULT_CONNECTION_TIMEOUT_SECONDS,
    DEFAULT_HANDSHAKE_TIMEOUT_SECONDS, DEFAULT_MAX_CLIENTS, DEFAULT_TOKEN_TTL_SECONDS, KEY_SIZE,
    MAC_SIZE, MAX_ENDPOINTS, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, NUM_DISCONNECT_PACKETS,
    PACKET_SEND_RATE_SEC, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE, USER_DATA_SIZE,
};
pub use crate::crypto::{generate_key, Key};
pub use crate::error::{Error, Result};
pub use crate::issuer::{issue, TokenBuilder, TokenIssuer};
pub use crate::keys::{KeyPair, PublicKey, SessionKeyPair};
pub use crate::packet::{AcceptedPacket, Packet, PacketKind};
pub use crate::server::{ClientIndex, Server, ServerConfig};
pub use crate::session::{DecryptError, SessionChannel};
pub use crate::socket::UdpTransport;
pub use crate::time::{time_now_secs, Clock};
pub use crate::token::{ConnectToken, Endpoints, TokenError};
pub use crate::transceiver::Transceiver;
