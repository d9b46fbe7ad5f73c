use std::io;

use byteorder::{LittleEndian, WriteBytesExt};
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, OsRng, Payload},
    ChaCha20Poly1305, KeyInit, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::consts::{KEY_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to generate random bytes: {0}")]
    GenerateKey(chacha20poly1305::aead::rand_core::Error),
    #[error("failed to encrypt or decrypt: {0}")]
    Aead(#[from] chacha20poly1305::Error),
    #[error("invalid signing key: {0}")]
    InvalidKey(#[from] ed25519_dalek::SignatureError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Key = [u8; KEY_SIZE];

pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], Error> {
    let mut bytes = [0; N];
    OsRng.try_fill_bytes(&mut bytes).map_err(Error::GenerateKey)?;
    Ok(bytes)
}

/// Generates a random symmetric key with the OS random number generator.
pub fn generate_key() -> Result<Key, Error> {
    random_bytes()
}

fn nonce(sequence: u64) -> Result<[u8; NONCE_SIZE], Error> {
    let mut final_nonce = [0; NONCE_SIZE];
    io::Cursor::new(&mut final_nonce[4..]).write_u64::<LittleEndian>(sequence)?;
    Ok(final_nonce)
}

/// Seals `plaintext`, returning the ciphertext with the authentication tag appended.
pub fn encrypt(plaintext: &[u8], aad: &[u8], sequence: u64, key: &Key) -> Result<Vec<u8>, Error> {
    let nonce = nonce(sequence)?;
    let ciphertext = ChaCha20Poly1305::new(key.into()).encrypt(
        Nonce::from_slice(&nonce),
        Payload {
            msg: plaintext,
            aad,
        },
    )?;
    Ok(ciphertext)
}

pub fn decrypt(ciphertext: &[u8], aad: &[u8], sequence: u64, key: &Key) -> Result<Vec<u8>, Error> {
    let nonce = nonce(sequence)?;
    let plaintext = ChaCha20Poly1305::new(key.into()).decrypt(
        Nonce::from_slice(&nonce),
        Payload {
            msg: ciphertext,
            aad,
        },
    )?;
    Ok(plaintext)
}

pub(crate) fn sign(signing_key: &SigningKey, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
    signing_key.sign(message).to_bytes()
}

/// Strict Ed25519 verification. An unparsable public key never verifies.
pub(crate) fn verify(
    public_key: &[u8; PUBLIC_KEY_SIZE],
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    verifying_key
        .verify_strict(message, &Signature::from_bytes(signature))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt() {
        let key = generate_key().unwrap();
        let sealed = encrypt(b"hello", b"aad", 7, &key).unwrap();
        assert_eq!(sealed.len(), 5 + crate::consts::MAC_SIZE);
        assert_eq!(decrypt(&sealed, b"aad", 7, &key).unwrap(), b"hello");
        assert!(decrypt(&sealed, b"aad", 8, &key).is_err());
        assert!(decrypt(&sealed, b"other", 7, &key).is_err());
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(generate_key().unwrap(), generate_key().unwrap());
    }
}
