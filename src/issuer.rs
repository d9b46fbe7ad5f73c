use std::net::ToSocketAddrs;

use crate::{
    consts::{
        CONNECT_TOKEN_SIZE, DEFAULT_HANDSHAKE_TIMEOUT_SECONDS, DEFAULT_TOKEN_TTL_SECONDS,
        USER_DATA_SIZE,
    },
    error::{Error, Result},
    keys::{KeyPair, SessionKeyPair},
    token::{ConnectToken, Endpoints},
};

/// The authority that hands out connect tokens, usually a web backend the game servers trust.
///
/// Issuing a token has no side effects besides drawing randomness for the session keys, so the
/// issuer can live on a machine that never talks to a game server.
///
/// # Example
/// ```
/// use cute_net::{KeyPair, TokenIssuer};
///
/// let issuer = TokenIssuer::new(0x11223344, KeyPair::generate().unwrap());
/// let now = 1_700_000_000;
/// let token_bytes = issuer
///     .token(5, "127.0.0.1:5001")
///     .ttl_seconds(60)
///     .handshake_timeout(5)
///     .generate(now)
///     .unwrap();
/// assert_eq!(token_bytes.len(), cute_net::CONNECT_TOKEN_SIZE);
/// ```
#[derive(Debug)]
pub struct TokenIssuer {
    application_id: u64,
    key_pair: KeyPair,
}

impl TokenIssuer {
    pub fn new(application_id: u64, key_pair: KeyPair) -> Self {
        Self {
            application_id,
            key_pair,
        }
    }
    pub fn application_id(&self) -> u64 {
        self.application_id
    }
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
    /// Starts building a token for `client_id` that authorizes the given server endpoints.
    pub fn token<A: ToSocketAddrs>(&self, client_id: u64, endpoints: A) -> TokenBuilder<'_, A> {
        TokenBuilder {
            issuer: self,
            client_id,
            endpoints,
            ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT_SECONDS,
            user_data: [0; USER_DATA_SIZE],
        }
    }
}

/// Per-token options, see [`TokenIssuer::token`].
pub struct TokenBuilder<'a, A> {
    issuer: &'a TokenIssuer,
    client_id: u64,
    endpoints: A,
    ttl_seconds: u64,
    handshake_timeout: u32,
    user_data: [u8; USER_DATA_SIZE],
}

impl<'a, A: ToSocketAddrs> TokenBuilder<'a, A> {
    /// How long the token stays valid after `now`. The default is 60 seconds.
    pub fn ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }
    /// How long a client may spend on the handshake with one endpoint. The default is 5 seconds.
    pub fn handshake_timeout(mut self, seconds: u32) -> Self {
        self.handshake_timeout = seconds;
        self
    }
    /// Application defined data handed to the server, zero padded to 256 bytes.
    pub fn user_data(mut self, user_data: &[u8]) -> Result<Self> {
        if user_data.len() > USER_DATA_SIZE {
            return Err(Error::UserDataTooLarge(user_data.len()));
        }
        self.user_data = [0; USER_DATA_SIZE];
        self.user_data[..user_data.len()].copy_from_slice(user_data);
        Ok(self)
    }
    /// Generates fresh session keys and signs the token, valid from `now` (unix seconds).
    pub fn generate(self, now: u64) -> Result<[u8; CONNECT_TOKEN_SIZE]> {
        let endpoints = Endpoints::new(self.endpoints)?;
        let token = ConnectToken {
            application_id: self.issuer.application_id,
            creation_timestamp: now,
            expiration_timestamp: now.saturating_add(self.ttl_seconds),
            handshake_timeout_seconds: self.handshake_timeout,
            endpoints,
            client_id: self.client_id,
            user_data: self.user_data,
            session_keys: SessionKeyPair::generate()?,
        };
        log::debug!(
            "issued connect token for client {} expiring at {}",
            token.client_id,
            token.expiration_timestamp
        );
        token.encode(&self.issuer.key_pair)
    }
}

/// Issues a signed connect token in one call. See [`TokenIssuer`] for the builder form.
pub fn issue(
    client_id: u64,
    endpoints: impl ToSocketAddrs,
    application_id: u64,
    key_pair: &KeyPair,
    now: u64,
    ttl_seconds: u64,
    handshake_timeout: u32,
) -> Result<[u8; CONNECT_TOKEN_SIZE]> {
    let token = ConnectToken {
        application_id,
        creation_timestamp: now,
        expiration_timestamp: now.saturating_add(ttl_seconds),
        handshake_timeout_seconds: handshake_timeout,
        endpoints: Endpoints::new(endpoints)?,
        client_id,
        user_data: [0; USER_DATA_SIZE],
        session_keys: SessionKeyPair::generate()?,
    };
    token.encode(key_pair)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::token::TokenError;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn issued_token_verifies_immediately() {
        let key_pair = KeyPair::generate().unwrap();
        for ttl in [1, 60, 3600] {
            let bytes = issue(5, "127.0.0.1:5001", 7, &key_pair, NOW, ttl, 5).unwrap();
            let token =
                ConnectToken::decode_and_verify(&bytes, &key_pair.public_key(), 7, NOW).unwrap();
            assert_eq!(token.client_id, 5);
            assert_eq!(token.application_id, 7);
            assert_eq!(token.creation_timestamp, NOW);
            assert_eq!(token.expiration_timestamp, NOW + ttl);
            assert_eq!(token.handshake_timeout_seconds, 5);
            assert_eq!(
                token.endpoints.get(0),
                Some(SocketAddr::from(([127, 0, 0, 1], 5001)))
            );
            assert_eq!(token.user_data, [0; USER_DATA_SIZE]);

            let expired = ConnectToken::decode_and_verify(
                &bytes,
                &key_pair.public_key(),
                7,
                NOW + ttl,
            );
            assert_eq!(expired.unwrap_err(), TokenError::Expired);
        }
    }

    #[test]
    fn every_token_gets_fresh_keys() {
        let issuer = TokenIssuer::new(1, KeyPair::generate().unwrap());
        let public_key = issuer.key_pair().public_key();
        let a = issuer.token(1, "127.0.0.1:5001").generate(NOW).unwrap();
        let b = issuer.token(1, "127.0.0.1:5001").generate(NOW).unwrap();
        let a = ConnectToken::decode_and_verify(&a, &public_key, 1, NOW).unwrap();
        let b = ConnectToken::decode_and_verify(&b, &public_key, 1, NOW).unwrap();
        assert_ne!(
            a.session_keys.client_to_server_key,
            b.session_keys.client_to_server_key
        );
        assert_ne!(
            a.session_keys.client_to_server_key,
            a.session_keys.server_to_client_key
        );
    }

    #[test]
    fn user_data_is_zero_padded() {
        let issuer = TokenIssuer::new(1, KeyPair::generate().unwrap());
        let bytes = issuer
            .token(9, "127.0.0.1:5001")
            .user_data(b"level=3")
            .unwrap()
            .generate(NOW)
            .unwrap();
        let token =
            ConnectToken::decode_and_verify(&bytes, &issuer.key_pair().public_key(), 1, NOW)
                .unwrap();
        assert_eq!(&token.user_data[..7], b"level=3");
        assert!(token.user_data[7..].iter().all(|&b| b == 0));

        let too_big = [1u8; USER_DATA_SIZE + 1];
        assert!(matches!(
            issuer.token(9, "127.0.0.1:5001").user_data(&too_big),
            Err(Error::UserDataTooLarge(257))
        ));
    }

    #[test]
    fn invalid_endpoints() {
        let key_pair = KeyPair::generate().unwrap();
        let none: &[SocketAddr] = &[];
        assert!(matches!(
            issue(1, none, 1, &key_pair, NOW, 60, 5),
            Err(Error::InvalidEndpoints(0))
        ));
        let too_many = (0..40)
            .map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
            .collect::<Vec<_>>();
        assert!(matches!(
            issue(1, &too_many[..], 1, &key_pair, NOW, 60, 5),
            Err(Error::InvalidEndpoints(40))
        ));
    }
}
