pub const KEY_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SECRET_KEY_SIZE: usize = 64;
pub const SIGNATURE_SIZE: usize = 64;
pub const USER_DATA_SIZE: usize = 256;
pub const MAX_ENDPOINTS: usize = 32;
pub const CONNECT_TOKEN_SIZE: usize = 1114;
pub const CONNECT_TOKEN_SIGNED_SIZE: usize = CONNECT_TOKEN_SIZE - SIGNATURE_SIZE;
pub const MAC_SIZE: usize = 16;
pub const MAX_PACKET_SIZE: usize = 1200;
// 8 bytes for sequence number, 1 byte for packet kind
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - MAC_SIZE - 8 - 1;
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 60;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECONDS: u32 = 5;
pub const DEFAULT_CONNECTION_TIMEOUT_SECONDS: f64 = 15.0;
pub const PACKET_SEND_RATE_SEC: f64 = 0.1;
pub const NUM_DISCONNECT_PACKETS: usize = 10;
pub const DEFAULT_MAX_CLIENTS: usize = 32;

pub(crate) const SOCKET_RECV_BUF_SIZE: usize = 4 * 1024 * 1024;
pub(crate) const SOCKET_SEND_BUF_SIZE: usize = 4 * 1024 * 1024;
pub(crate) const NONCE_SIZE: usize = 12;
pub(crate) const REPLAY_PROTECTION_BUFFER_SIZE: usize = 256;
