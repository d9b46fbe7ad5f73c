use thiserror::Error;

use crate::client::ConnectionFailure;
use crate::consts::{MAX_ENDPOINTS, MAX_PAYLOAD_SIZE, USER_DATA_SIZE};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Socket(#[from] crate::socket::Error),
    #[error(transparent)]
    Crypto(#[from] crate::crypto::Error),
    #[error("invalid connect token: {0}")]
    InvalidToken(#[from] crate::token::TokenError),
    #[error("invalid packet: {0}")]
    Packet(#[from] crate::packet::Error),
    #[error("failed to open packet: {0}")]
    Decrypt(#[from] crate::session::DecryptError),
    #[error("clock went backwards (did you invent a time machine?): {0}")]
    SystemTime(#[from] std::time::SystemTimeError),
    #[error("endpoint list length is out of range 1-{max}: {0}", max = MAX_ENDPOINTS)]
    InvalidEndpoints(usize),
    #[error("user data size exceeded, got {0} but max is {max}", max = USER_DATA_SIZE)]
    UserDataTooLarge(usize),
    #[error("payload size exceeded, got {0} but max is {max}", max = MAX_PAYLOAD_SIZE)]
    PayloadSizeExceeded(usize),
    #[error("empty payload")]
    EmptyPayload,
    #[error("client is not connected")]
    NotConnected,
    #[error("connection failed: {0}")]
    ConnectionFailed(ConnectionFailure),
    #[error("tried to send a packet to a client that doesn't exist")]
    ClientNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
