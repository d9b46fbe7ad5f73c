use std::{
    collections::VecDeque,
    fmt,
    net::{Ipv4Addr, SocketAddr},
};

use crate::{
    consts::{
        CONNECT_TOKEN_SIZE, DEFAULT_CONNECTION_TIMEOUT_SECONDS, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE,
        NUM_DISCONNECT_PACKETS, PACKET_SEND_RATE_SEC, SIGNATURE_SIZE,
    },
    error::{Error, Result},
    keys::{PublicKey, SessionKeyPair},
    packet::{Packet, RequestPacket},
    session::SessionChannel,
    socket::UdpTransport,
    time::time_now_secs,
    token::{ConnectToken, TokenError},
    transceiver::Transceiver,
};

type Callback<Ctx> = Box<dyn FnMut(ClientState, ClientState, &mut Ctx) + Send + Sync + 'static>;

/// Configuration for a client
///
/// * `application_id` - Must match the id the connect token was issued for.
/// * `public_key` - The issuer's public key, used to verify connect tokens before any traffic is sent.
/// * `num_disconnect_packets` - The number of redundant disconnect packets that will be sent to a server when the clients wants to disconnect.
/// * `packet_send_rate` - The interval at which connection requests are retransmitted and keep-alives are sent.
/// * `connection_timeout` - How long a connected client tolerates silence from the server.
/// * `on_state_change` - A callback that will be called when the client changes states.
///
/// # Example
/// ```
/// # struct MyContext;
/// use cute_net::{ClientConfig, ClientState, KeyPair};
///
/// // in production the public key is loaded from configuration
/// let public_key = KeyPair::generate().unwrap().public_key();
/// let cfg = ClientConfig::with_context(0x11223344, public_key, MyContext {})
///     .num_disconnect_packets(10)
///     .packet_send_rate(0.1)
///     .on_state_change(|from, to, _ctx| {
///         if let (ClientState::SendingConnectionRequest, ClientState::Connected) = (from, to) {
///             println!("client connected to server");
///         }
///     });
/// ```
pub struct ClientConfig<Ctx> {
    application_id: u64,
    public_key: PublicKey,
    num_disconnect_packets: usize,
    packet_send_rate: f64,
    connection_timeout: f64,
    context: Ctx,
    on_state_change: Option<Callback<Ctx>>,
}

impl ClientConfig<()> {
    /// Create a new, default client configuration with no context.
    pub fn new(application_id: u64, public_key: PublicKey) -> Self {
        Self::with_context(application_id, public_key, ())
    }
}

impl<Ctx> ClientConfig<Ctx> {
    /// Create a new client configuration with context that will be passed to the callbacks.
    pub fn with_context(application_id: u64, public_key: PublicKey, ctx: Ctx) -> Self {
        Self {
            application_id,
            public_key,
            num_disconnect_packets: NUM_DISCONNECT_PACKETS,
            packet_send_rate: PACKET_SEND_RATE_SEC,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECONDS,
            context: ctx,
            on_state_change: None,
        }
    }
    /// Set the number of redundant disconnect packets that will be sent to a server when the clients wants to disconnect.
    /// The default is 10 packets.
    pub fn num_disconnect_packets(mut self, num_disconnect_packets: usize) -> Self {
        self.num_disconnect_packets = num_disconnect_packets;
        self
    }
    /// Set the interval at which periodic packets will be sent to the server.
    /// The default is 10 packets per second. (`0.1` seconds)
    pub fn packet_send_rate(mut self, rate_seconds: f64) -> Self {
        self.packet_send_rate = rate_seconds;
        self
    }
    /// Set how many seconds without hearing from the server a connected client waits before timing out.
    /// The default is 15 seconds.
    pub fn connection_timeout(mut self, seconds: f64) -> Self {
        self.connection_timeout = seconds;
        self
    }
    /// Set a callback that will be called when the client changes states.
    pub fn on_state_change<F>(mut self, cb: F) -> Self
    where
        F: FnMut(ClientState, ClientState, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(cb));
        self
    }
}

/// Why a connection attempt or an established connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionFailure {
    /// The connect token expired, either before `connect` or during the handshake.
    ConnectTokenExpired,
    /// The connect token failed verification.
    InvalidConnectToken,
    /// No response arrived within the handshake timeout, or the server went silent while connected.
    ConnectionTimedOut,
    /// The server refused the connection, most likely because it is full.
    ConnectionDenied,
    /// The transport failed to send or receive.
    ConnectionError,
}

impl ConnectionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionFailure::ConnectTokenExpired => "CONNECT_TOKEN_EXPIRED",
            ConnectionFailure::InvalidConnectToken => "INVALID_CONNECT_TOKEN",
            ConnectionFailure::ConnectionTimedOut => "CONNECTION_TIMED_OUT",
            ConnectionFailure::ConnectionDenied => "CONNECTION_DENIED",
            ConnectionFailure::ConnectionError => "CONNECTION_ERROR",
        }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The states in the client state machine.
///
/// The initial state is `Disconnected`.
/// A client obtains a connect token from the issuer (by REST API or other means) and passes it to
/// [`Client::connect`]. The token is verified locally; only a valid token moves the client to
/// `SendingConnectionRequest` with the first endpoint in the token.
///
/// While in `SendingConnectionRequest` the client retransmits the connection request at a fixed
/// interval until the server answers:
///
///  - an acceptance moves the client to `Connected`, with the session keys from the token installed;
///  - a denial moves the client to the next endpoint, or to `Failed(ConnectionDenied)` after the last one;
///  - silence for the token's handshake timeout does the same with `Failed(ConnectionTimedOut)`;
///  - the token expiring mid-handshake ends in `Failed(ConnectTokenExpired)`.
///
/// While `Connected` the client sends keep-alives when idle and times out when the server is
/// silent for too long. A disconnect packet from the server moves it back to `Disconnected`.
///
/// `Failed` states are terminal: only a new call to [`Client::connect`] leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// The client is not connected and not trying to.
    Disconnected,
    /// The client is waiting for a response from the server after sending a connection request packet.
    SendingConnectionRequest,
    /// The client is connected to the server.
    Connected,
    /// The last connection attempt or connection ended with an error.
    Failed(ConnectionFailure),
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Disconnected => "DISCONNECTED",
            ClientState::SendingConnectionRequest => "SENDING_CONNECTION_REQUEST",
            ClientState::Connected => "CONNECTED",
            ClientState::Failed(failure) => failure.as_str(),
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic name of a client state, e.g. `"CONNECTION_TIMED_OUT"`.
pub fn state_to_string(state: ClientState) -> &'static str {
    state.as_str()
}

/// The client end of a connection.
///
/// The client is driven by the caller: [`update`](Client::update) must be called at a steady rate
/// (e.g. 60Hz) with the elapsed time and the current unix time. It never blocks and never sleeps.
///
/// # Example
/// ```
/// # use cute_net::{Client, ClientConfig, ClientState, KeyPair, TokenIssuer};
/// # use std::time::{Instant, Duration};
/// # use std::thread;
/// let issuer = TokenIssuer::new(0x11223344, KeyPair::generate().unwrap());
/// let now = cute_net::time_now_secs().unwrap();
/// let token_bytes = issuer.token(5, "127.0.0.1:5001").generate(now).unwrap();
///
/// let cfg = ClientConfig::new(0x11223344, issuer.key_pair().public_key());
/// let mut client = Client::new(cfg).unwrap();
/// client.connect(&token_bytes).unwrap();
/// assert_eq!(client.state(), ClientState::SendingConnectionRequest);
///
/// let tick_rate = 1.0 / 60.0;
/// loop {
///     let now = cute_net::time_now_secs().unwrap();
///     if let Err(err) = client.update(tick_rate, now) {
///         println!("client encountered an error: {err}");
///         break;
///     }
///     while let Some(payload) = client.recv() {
///         // ...
///     }
///     if client.is_connected() {
///         client.send(b"Hello World!").unwrap();
///     }
///     thread::sleep(Duration::from_secs_f64(tick_rate));
///     # break;
/// }
/// ```
pub struct Client<T: Transceiver = UdpTransport, Ctx = ()> {
    transceiver: T,
    state: ClientState,
    time: f64,
    unix_time: u64,
    start_time: f64,
    last_send_time: f64,
    last_receive_time: f64,
    endpoint_idx: usize,
    token: Option<ConnectToken>,
    request: Option<RequestPacket>,
    /// One channel per endpoint of the last verified token. They outlive resets so a reconnect
    /// with the same token never reuses a sequence number or forgets a received one.
    channels: Vec<SessionChannel>,
    channels_signature: Option<[u8; SIGNATURE_SIZE]>,
    client_index: u32,
    max_clients: u32,
    received: VecDeque<Vec<u8>>,
    should_disconnect: bool,
    should_disconnect_state: ClientState,
    cfg: ClientConfig<Ctx>,
}

impl<Ctx> Client<UdpTransport, Ctx> {
    /// Create a new client bound to an ephemeral UDP port.
    pub fn new(cfg: ClientConfig<Ctx>) -> Result<Self> {
        let transceiver = UdpTransport::new((Ipv4Addr::UNSPECIFIED, 0))?;
        let client = Client::with_transceiver(transceiver, cfg);
        log::info!("client started on {}", client.addr());
        Ok(client)
    }
}

impl<T: Transceiver, Ctx> Client<T, Ctx> {
    /// Create a new client on top of any [`Transceiver`].
    pub fn with_transceiver(transceiver: T, cfg: ClientConfig<Ctx>) -> Self {
        Self {
            transceiver,
            state: ClientState::Disconnected,
            time: 0.0,
            unix_time: 0,
            start_time: 0.0,
            last_send_time: f64::NEG_INFINITY,
            last_receive_time: f64::NEG_INFINITY,
            endpoint_idx: 0,
            token: None,
            request: None,
            channels: Vec::new(),
            channels_signature: None,
            client_index: 0,
            max_clients: 0,
            received: VecDeque::new(),
            should_disconnect: false,
            should_disconnect_state: ClientState::Disconnected,
            cfg,
        }
    }
    fn set_state(&mut self, state: ClientState) {
        if self.state == state {
            return;
        }
        log::debug!("client state changing from {} to {}", self.state, state);
        if let Some(ref mut cb) = self.cfg.on_state_change {
            cb(self.state, state, &mut self.cfg.context)
        }
        self.state = state;
    }
    fn reset_connection(&mut self) {
        self.start_time = self.time;
        self.last_send_time = f64::NEG_INFINITY; // force a packet to be sent on the next update
        self.last_receive_time = self.time;
        self.should_disconnect = false;
        self.should_disconnect_state = ClientState::Disconnected;
        self.client_index = 0;
        self.max_clients = 0;
        self.received.clear();
    }
    fn reset(&mut self, new_state: ClientState) {
        self.endpoint_idx = 0;
        self.token = None;
        self.request = None;
        self.reset_connection();
        self.set_state(new_state);
    }
    fn begin_handshake(&mut self) {
        let Some(token) = self.token.as_ref() else {
            return;
        };
        let num_endpoints = token.endpoints.len();
        self.reset_connection();
        self.set_state(ClientState::SendingConnectionRequest);
        if let Some(endpoint) = self.endpoint() {
            log::info!(
                "client connecting to server {} [{}/{}]",
                endpoint,
                self.endpoint_idx + 1,
                num_endpoints
            );
        }
    }
    fn connect_to_next_endpoint(&mut self) -> bool {
        let num_endpoints = self.token.as_ref().map_or(0, |token| token.endpoints.len());
        if self.endpoint_idx + 1 >= num_endpoints {
            log::debug!("no more endpoints to connect to");
            return false;
        }
        self.endpoint_idx += 1;
        self.begin_handshake();
        true
    }
    fn fail_transport(&mut self) {
        self.should_disconnect = true;
        self.should_disconnect_state = ClientState::Failed(ConnectionFailure::ConnectionError);
    }
    fn send_datagram(&mut self, buf: &[u8]) -> Result<()> {
        let Some(addr) = self.endpoint() else {
            return Err(Error::NotConnected);
        };
        self.transceiver.send(buf, addr).map_err(Into::<Error>::into)?;
        self.last_send_time = self.time;
        Ok(())
    }
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.token.is_none() {
            return Err(Error::NotConnected);
        }
        // all endpoints share the client-to-server key
        let sequence = self.channels.iter().map(SessionChannel::sequence).max();
        let Some(channel) = self.channels.get_mut(self.endpoint_idx) else {
            return Err(Error::NotConnected);
        };
        channel.skip_to(sequence.unwrap_or(0));
        let buf = channel.seal(packet)?;
        self.send_datagram(&buf)
    }
    fn send_periodic_packets(&mut self) {
        if self.last_send_time + self.cfg.packet_send_rate > self.time {
            return;
        }
        let result = match self.state {
            ClientState::SendingConnectionRequest => {
                log::debug!("client sending connection request packet to server");
                match self.request.as_ref().map(RequestPacket::write) {
                    Some(buf) => self.send_datagram(&buf),
                    None => return,
                }
            }
            ClientState::Connected => {
                log::trace!("client sending keep-alive packet to server");
                self.send_packet(&Packet::KeepAlive)
            }
            _ => return,
        };
        if let Err(e) = result {
            log::error!("client failed to send packet: {e}");
            self.fail_transport();
        }
    }
    fn send_disconnect_packets(&mut self) {
        log::debug!(
            "client sending {} disconnect packets to server",
            self.cfg.num_disconnect_packets
        );
        for _ in 0..self.cfg.num_disconnect_packets {
            if let Err(e) = self.send_packet(&Packet::Disconnect) {
                log::debug!("client failed to send disconnect packet: {e}");
                break;
            }
        }
    }
    fn recv_packets(&mut self) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let received = self.transceiver.recv(&mut buf).map_err(Into::<Error>::into);
            let (size, addr) = match received {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(e) => {
                    log::error!("client failed to receive packet: {e}");
                    self.fail_transport();
                    break;
                }
            };
            self.process_packet(addr, &buf[..size]);
        }
    }
    fn process_packet(&mut self, addr: SocketAddr, buf: &[u8]) {
        if self.endpoint() != Some(addr) {
            log::trace!("client ignored packet from unexpected address {addr}");
            return;
        }
        let Some(channel) = self.channels.get_mut(self.endpoint_idx) else {
            return;
        };
        let packet = match channel.open(buf) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("client ignored packet: {e}");
                return;
            }
        };
        match (packet, self.state) {
            (Packet::Denied | Packet::Disconnect, ClientState::SendingConnectionRequest) => {
                log::debug!("client received connection denied packet from server");
                self.should_disconnect = true;
                self.should_disconnect_state =
                    ClientState::Failed(ConnectionFailure::ConnectionDenied);
            }
            (Packet::Accepted(pkt), ClientState::SendingConnectionRequest) => {
                log::debug!("client received connection accepted packet from server");
                self.client_index = pkt.client_index;
                self.max_clients = pkt.max_clients;
                self.set_state(ClientState::Connected);
                log::info!("client connected to server");
            }
            (Packet::KeepAlive | Packet::Accepted(_), ClientState::Connected) => {
                log::trace!("client received keep-alive from server");
            }
            (Packet::Payload(payload), ClientState::Connected) => {
                log::trace!("client received payload packet from server");
                self.received.push_back(payload);
            }
            (Packet::Disconnect, ClientState::Connected) => {
                log::debug!("client received disconnect packet from server");
                self.should_disconnect = true;
                self.should_disconnect_state = ClientState::Disconnected;
            }
            _ => return,
        }
        self.last_receive_time = self.time;
    }
    /// Applies timeouts, expiry and pending disconnects, returning the failure entered, if any.
    fn advance_state(&mut self) -> Option<ConnectionFailure> {
        let (is_token_expired, handshake_timeout) = match self.token.as_ref() {
            Some(token) => (
                self.unix_time >= token.expiration_timestamp,
                token.handshake_timeout_seconds as f64,
            ),
            None => (false, f64::INFINITY),
        };
        let is_handshake_timed_out = self.time - self.start_time >= handshake_timeout;
        let is_connection_timed_out =
            self.last_receive_time + self.cfg.connection_timeout < self.time;
        let new_state = match self.state {
            ClientState::SendingConnectionRequest if is_token_expired => {
                log::info!("client connect failed. connect token expired");
                ClientState::Failed(ConnectionFailure::ConnectTokenExpired)
            }
            _ if self.should_disconnect => {
                log::debug!(
                    "client should disconnect -> {}",
                    self.should_disconnect_state
                );
                let denied = ClientState::Failed(ConnectionFailure::ConnectionDenied);
                if self.should_disconnect_state == denied && self.connect_to_next_endpoint() {
                    return None;
                }
                self.should_disconnect_state
            }
            ClientState::SendingConnectionRequest if is_handshake_timed_out => {
                log::info!("client connect failed. connection request timed out");
                if self.connect_to_next_endpoint() {
                    return None;
                }
                ClientState::Failed(ConnectionFailure::ConnectionTimedOut)
            }
            ClientState::Connected if is_connection_timed_out => {
                log::info!("client connection timed out");
                ClientState::Failed(ConnectionFailure::ConnectionTimedOut)
            }
            _ => return None,
        };
        self.reset(new_state);
        match new_state {
            ClientState::Failed(failure) => Some(failure),
            _ => None,
        }
    }
    /// Verifies `token_bytes` against the wall clock and starts the handshake.
    ///
    /// See [`connect_at`](Client::connect_at).
    pub fn connect(&mut self, token_bytes: &[u8]) -> Result<()> {
        let now = time_now_secs()?;
        self.connect_at(token_bytes, now)
    }
    /// Verifies `token_bytes` as of the unix time `now` and starts the handshake.
    ///
    /// This function does not perform any IO besides notifying a currently connected server:
    /// the first connection request goes out on the next call to [`update`](Client::update).
    /// Calling it while already connecting restarts the handshake from the first endpoint.
    /// An invalid token fails immediately, leaving the client in a `Failed` state.
    pub fn connect_at(&mut self, token_bytes: &[u8], now: u64) -> Result<()> {
        self.unix_time = now;
        let verified = ConnectToken::decode_and_verify(
            token_bytes,
            &self.cfg.public_key,
            self.cfg.application_id,
            now,
        );
        if self.is_connected() {
            self.send_disconnect_packets();
        }
        let token = match verified {
            Ok(token) => token,
            Err(err) => {
                log::error!("client connect failed. invalid connect token: {err}");
                let failure = match err {
                    TokenError::Expired => ConnectionFailure::ConnectTokenExpired,
                    _ => ConnectionFailure::InvalidConnectToken,
                };
                self.reset(ClientState::Failed(failure));
                return Err(Error::InvalidToken(err));
            }
        };
        let mut request_token = [0u8; CONNECT_TOKEN_SIZE];
        request_token.copy_from_slice(token_bytes);
        let signature = ConnectToken::signature(&request_token);
        if self.channels_signature != Some(signature) {
            self.channels = token
                .endpoints
                .iter()
                .map(|_| SessionChannel::for_client(self.cfg.application_id, &token.session_keys))
                .collect();
            self.channels_signature = Some(signature);
        }
        self.reset(ClientState::Disconnected);
        self.request = Some(RequestPacket::create(request_token));
        self.token = Some(token);
        self.begin_handshake();
        Ok(())
    }
    /// Advances the client by `dt` seconds; `now` is the current unix time.
    ///
    /// Receives and processes every pending packet, applies timeouts, and sends connection
    /// requests or keep-alives when they are due. A zero `dt` does nothing.
    ///
    /// Returns an error on the update that moves the client into a `Failed` state.
    pub fn update(&mut self, dt: f64, now: u64) -> Result<()> {
        if dt.is_nan() || dt <= 0.0 {
            return Ok(());
        }
        self.time += dt;
        self.unix_time = now;
        if !self.is_pending() && !self.is_connected() {
            return Ok(());
        }
        self.recv_packets();
        if let Some(failure) = self.advance_state() {
            return Err(Error::ConnectionFailed(failure));
        }
        self.send_periodic_packets();
        Ok(())
    }
    /// Disconnects the client from the server.
    ///
    /// A connected client sends a number of redundant disconnect packets to the server before
    /// transitioning to `Disconnected`. Delivery is not confirmed.
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            self.send_disconnect_packets();
        }
        self.reset(ClientState::Disconnected);
        log::debug!("client disconnected");
    }
    /// Sends a payload to the server.
    ///
    /// Fails with [`Error::NotConnected`] unless the client is connected; the payload must be no larger than
    /// [`MAX_PAYLOAD_SIZE`](crate::MAX_PAYLOAD_SIZE).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.state != ClientState::Connected {
            return Err(Error::NotConnected);
        }
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadSizeExceeded(payload.len()));
        }
        self.send_packet(&Packet::Payload(payload.to_vec()))
    }
    /// Pops the oldest payload received from the server.
    pub fn recv(&mut self) -> Option<Vec<u8>> {
        self.received.pop_front()
    }
    /// Gets the local `SocketAddr` that the client is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.transceiver.addr()
    }
    /// The endpoint of the current connection attempt or connection.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.token
            .as_ref()
            .and_then(|token| token.endpoints.get(self.endpoint_idx))
    }
    /// Gets the current state of the client.
    pub fn state(&self) -> ClientState {
        self.state
    }
    /// Seconds spent on the handshake with the current endpoint, or in the current connection.
    pub fn elapsed(&self) -> f64 {
        self.time - self.start_time
    }
    /// Returns true if the client is in an error state.
    pub fn is_error(&self) -> bool {
        matches!(self.state, ClientState::Failed(_))
    }
    /// Returns true if the client is in a pending state.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, ClientState::SendingConnectionRequest)
    }
    /// Returns true if the client is connected to a server.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ClientState::Connected)
    }
    /// The slot the server assigned to this client.
    pub fn client_index(&self) -> Option<u32> {
        self.is_connected().then_some(self.client_index)
    }
    pub fn max_clients(&self) -> Option<u32> {
        self.is_connected().then_some(self.max_clients)
    }
    /// The session keys protecting the established connection.
    pub fn session_keys(&self) -> Option<&SessionKeyPair> {
        if !self.is_connected() {
            return None;
        }
        self.token.as_ref().map(|token| &token.session_keys)
    }
    #[cfg(test)]
    pub(crate) fn transceiver_mut(&mut self) -> &mut T {
        &mut self.transceiver
    }
}
