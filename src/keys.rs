use std::fmt;

use ed25519_dalek::SigningKey;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    consts::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE},
    crypto::{self, Key},
};

/// The signing keypair held by the token issuing authority.
///
/// The secret half never leaves the authority: it is only used to sign connect tokens.
/// Game servers and clients are configured with the [`PublicKey`] alone.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generates a fresh keypair from the OS random number generator.
    pub fn generate() -> Result<Self, crypto::Error> {
        let seed = Zeroizing::new(crypto::random_bytes::<32>()?);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Loads a keypair from its 64 byte secret form (seed followed by the public key),
    /// e.g. as read from a secret store at start-up.
    pub fn from_secret_key(secret_key: &[u8; SECRET_KEY_SIZE]) -> Result<Self, crypto::Error> {
        Ok(Self {
            signing_key: SigningKey::from_keypair_bytes(secret_key)?,
        })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn secret_key(&self) -> Zeroizing<[u8; SECRET_KEY_SIZE]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    pub(crate) fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        crypto::sign(&self.signing_key, message)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// The public half of the issuer's [`KeyPair`], used to verify connect tokens.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub(crate) fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> bool {
        crypto::verify(&self.0, message, signature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// The two symmetric keys protecting a single connection, one per direction.
///
/// Generated fresh for every connect token; wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyPair {
    pub client_to_server_key: Key,
    pub server_to_client_key: Key,
}

impl SessionKeyPair {
    pub fn generate() -> Result<Self, crypto::Error> {
        Ok(Self {
            client_to_server_key: crypto::generate_key()?,
            server_to_client_key: crypto::generate_key()?,
        })
    }
}

impl fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeyPair { .. }")
    }
}
