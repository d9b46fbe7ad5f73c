use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use zeroize::Zeroize;

use crate::{
    consts::{MAC_SIZE, MAX_PACKET_SIZE},
    crypto::{self, Key},
    error::Result,
    keys::SessionKeyPair,
    packet::{Packet, PacketKind},
    replay::ReplayProtection,
};

const HEADER_SIZE: usize = 1 + 8;

/// Reasons an incoming sealed packet is dropped.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptError {
    #[error("malformed packet")]
    Malformed,
    #[error("packet failed authentication")]
    Authentication,
    #[error("packet sequence was already received")]
    Replayed,
    #[error("unexpected packet kind")]
    UnexpectedPacket,
}

/// One end of an encrypted connection.
///
/// Every sealed packet is laid out as `[kind][sequence (u64)][ciphertext + tag]`. The sequence is
/// the AEAD nonce, and `application id || kind` is the associated data, so a packet can neither be
/// moved to another application nor relabelled. Incoming sequences go through a replay window.
pub struct SessionChannel {
    application_id: u64,
    send_key: Key,
    receive_key: Key,
    sequence: u64,
    replay_protection: ReplayProtection,
}

impl SessionChannel {
    pub fn new(application_id: u64, send_key: Key, receive_key: Key) -> Self {
        Self {
            application_id,
            send_key,
            receive_key,
            sequence: 0,
            replay_protection: ReplayProtection::new(),
        }
    }
    /// Sends with the client-to-server key and receives with the server-to-client key.
    pub fn for_client(application_id: u64, keys: &SessionKeyPair) -> Self {
        Self::new(
            application_id,
            keys.client_to_server_key,
            keys.server_to_client_key,
        )
    }
    /// The mirror image of [`for_client`](SessionChannel::for_client).
    pub fn for_server(application_id: u64, keys: &SessionKeyPair) -> Self {
        Self::new(
            application_id,
            keys.server_to_client_key,
            keys.client_to_server_key,
        )
    }
    /// Starts sealing at `sequence` instead of zero.
    pub fn starting_at(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
    /// The sequence number the next sealed packet will carry.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
    /// Moves the send sequence forward to at least `sequence`. It never moves back.
    pub fn skip_to(&mut self, sequence: u64) {
        self.sequence = self.sequence.max(sequence);
    }

    fn aad(&self, kind: PacketKind) -> Result<[u8; 9]> {
        let mut aad = [0u8; 9];
        let mut cursor = io::Cursor::new(&mut aad[..]);
        cursor.write_u64::<LittleEndian>(self.application_id)?;
        cursor.write_u8(kind as u8)?;
        Ok(aad)
    }

    pub fn seal(&mut self, packet: &Packet) -> Result<Vec<u8>> {
        let kind = packet.kind();
        let mut body = Vec::new();
        packet.write_body(&mut body)?;
        let ciphertext = crypto::encrypt(&body, &self.aad(kind)?, self.sequence, &self.send_key)?;
        body.zeroize();

        let mut buf = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        buf.write_u8(kind as u8)?;
        buf.write_u64::<LittleEndian>(self.sequence)?;
        buf.extend_from_slice(&ciphertext);
        self.sequence += 1;
        Ok(buf)
    }

    /// Authenticates and decrypts a sealed packet. Failures leave the replay window untouched.
    pub fn open(&mut self, buf: &[u8]) -> std::result::Result<Packet, DecryptError> {
        if buf.len() < HEADER_SIZE + MAC_SIZE || buf.len() > MAX_PACKET_SIZE {
            return Err(DecryptError::Malformed);
        }
        let kind = PacketKind::try_from(buf[0]).map_err(|_| DecryptError::Malformed)?;
        if kind == PacketKind::Request {
            return Err(DecryptError::UnexpectedPacket);
        }
        let sequence = (&buf[1..HEADER_SIZE])
            .read_u64::<LittleEndian>()
            .map_err(|_| DecryptError::Malformed)?;
        if self.replay_protection.is_already_received(sequence) {
            return Err(DecryptError::Replayed);
        }
        let aad = self.aad(kind).map_err(|_| DecryptError::Malformed)?;
        let mut body = crypto::decrypt(&buf[HEADER_SIZE..], &aad, sequence, &self.receive_key)
            .map_err(|_| DecryptError::Authentication)?;
        let packet = Packet::read_body(kind, &body).map_err(|_| DecryptError::Malformed);
        body.zeroize();
        let packet = packet?;
        self.replay_protection.advance(sequence);
        Ok(packet)
    }

    /// Seals an application payload.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal(&Packet::Payload(plaintext.to_vec()))
    }

    /// Opens a sealed application payload; any other packet kind is rejected.
    pub fn decrypt(&mut self, buf: &[u8]) -> std::result::Result<Vec<u8>, DecryptError> {
        match self.open(buf)? {
            Packet::Payload(plaintext) => Ok(plaintext),
            _ => Err(DecryptError::UnexpectedPacket),
        }
    }
}

/// A random first sequence number for a server's packets under one connect token, below 2^63.
pub(crate) fn random_initial_sequence() -> Result<u64> {
    Ok(u64::from_le_bytes(crypto::random_bytes::<8>()?) >> 1)
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.send_key.zeroize();
        self.receive_key.zeroize();
    }
}
