use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, ToSocketAddrs};

use crate::{
    consts::{
        DEFAULT_CONNECTION_TIMEOUT_SECONDS, DEFAULT_MAX_CLIENTS, MAX_PACKET_SIZE,
        MAX_PAYLOAD_SIZE, NUM_DISCONNECT_PACKETS, PACKET_SEND_RATE_SEC, SIGNATURE_SIZE,
        USER_DATA_SIZE,
    },
    error::{Error, Result},
    free_list::FreeList,
    keys::PublicKey,
    packet::{AcceptedPacket, Packet, RequestPacket},
    session::{random_initial_sequence, SessionChannel},
    socket::UdpTransport,
    token::ConnectToken,
    transceiver::Transceiver,
};

/// The slot a connected client occupies on the server, in `0..max_clients`.
pub type ClientIndex = usize;

type Callback<Ctx> = Box<dyn FnMut(ClientIndex, &mut Ctx) + Send + Sync + 'static>;

/// Configuration for a server.
///
/// * `application_id` - Connect tokens issued for any other application are rejected.
/// * `public_key` - The issuer's public key, used to verify connect tokens.
/// * `max_clients` - The number of client slots. Requests beyond it are denied.
/// * `connection_timeout` - How long a client may stay silent before it is dropped.
/// * `packet_send_rate` - The interval at which keep-alives are sent to idle clients.
/// * `num_disconnect_packets` - The number of redundant disconnect packets sent when the server drops a client.
/// * `on_connect` / `on_disconnect` - Callbacks invoked with the slot of a client that came or went.
///
/// # Example
/// ```
/// use cute_net::{KeyPair, ServerConfig};
///
/// let public_key = KeyPair::generate().unwrap().public_key();
/// let cfg = ServerConfig::with_context(0x11223344, public_key, 0u32)
///     .max_clients(16)
///     .on_connect(|idx, num_connects| {
///         *num_connects += 1;
///         println!("client {idx} connected");
///     });
/// ```
pub struct ServerConfig<Ctx> {
    application_id: u64,
    public_key: PublicKey,
    max_clients: usize,
    connection_timeout: f64,
    packet_send_rate: f64,
    num_disconnect_packets: usize,
    context: Ctx,
    on_connect: Option<Callback<Ctx>>,
    on_disconnect: Option<Callback<Ctx>>,
}

impl ServerConfig<()> {
    pub fn new(application_id: u64, public_key: PublicKey) -> Self {
        Self::with_context(application_id, public_key, ())
    }
}

impl<Ctx> ServerConfig<Ctx> {
    pub fn with_context(application_id: u64, public_key: PublicKey, ctx: Ctx) -> Self {
        Self {
            application_id,
            public_key,
            max_clients: DEFAULT_MAX_CLIENTS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_SECONDS,
            packet_send_rate: PACKET_SEND_RATE_SEC,
            num_disconnect_packets: NUM_DISCONNECT_PACKETS,
            context: ctx,
            on_connect: None,
            on_disconnect: None,
        }
    }
    /// The default is 32 clients.
    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }
    /// The default is 15 seconds.
    pub fn connection_timeout(mut self, seconds: f64) -> Self {
        self.connection_timeout = seconds;
        self
    }
    /// The default is 10 packets per second. (`0.1` seconds)
    pub fn packet_send_rate(mut self, rate_seconds: f64) -> Self {
        self.packet_send_rate = rate_seconds;
        self
    }
    /// The default is 10 packets.
    pub fn num_disconnect_packets(mut self, num_disconnect_packets: usize) -> Self {
        self.num_disconnect_packets = num_disconnect_packets;
        self
    }
    pub fn on_connect<F>(mut self, cb: F) -> Self
    where
        F: FnMut(ClientIndex, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(cb));
        self
    }
    pub fn on_disconnect<F>(mut self, cb: F) -> Self
    where
        F: FnMut(ClientIndex, &mut Ctx) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(cb));
        self
    }
}

struct Connection {
    client_id: u64,
    addr: SocketAddr,
    channel: SessionChannel,
    last_send_time: f64,
    last_receive_time: f64,
    user_data: [u8; USER_DATA_SIZE],
}

/// A connect token seen in a verified request, remembered until it expires.
///
/// Every packet the server seals under the token's keys takes the next `send_sequence`, so a
/// denial and a later acceptance never share a nonce.
struct TokenEntry {
    /// The address the token was consumed by, if it was accepted.
    accepted_addr: Option<SocketAddr>,
    expiration_timestamp: u64,
    send_sequence: u64,
}

/// The server end of the protocol.
///
/// Verifies connect tokens, hands out client slots and carries encrypted payloads. Like the
/// [`Client`](crate::Client) it is driven by calling [`update`](Server::update) in a loop.
///
/// # Example
/// ```
/// # use cute_net::{KeyPair, Server, ServerConfig};
/// let key_pair = KeyPair::generate().unwrap();
/// let cfg = ServerConfig::new(0x11223344, key_pair.public_key());
/// let mut server = Server::new("127.0.0.1:0", cfg).unwrap();
///
/// let now = cute_net::time_now_secs().unwrap();
/// server.update(1.0 / 60.0, now);
/// while let Some((payload, client_idx)) = server.recv() {
///     server.send(&payload, client_idx).unwrap();
/// }
/// ```
pub struct Server<T: Transceiver = UdpTransport, Ctx = ()> {
    transceiver: T,
    time: f64,
    unix_time: u64,
    clients: FreeList<Connection>,
    addr_to_idx: HashMap<SocketAddr, ClientIndex>,
    id_to_idx: HashMap<u64, ClientIndex>,
    tokens: HashMap<[u8; SIGNATURE_SIZE], TokenEntry>,
    received: VecDeque<(Vec<u8>, ClientIndex)>,
    cfg: ServerConfig<Ctx>,
}

impl<Ctx> Server<UdpTransport, Ctx> {
    /// Create a new server bound to `addr`. The bound address must be listed in the connect tokens.
    pub fn new(addr: impl ToSocketAddrs, cfg: ServerConfig<Ctx>) -> Result<Self> {
        let transceiver = UdpTransport::new(addr)?;
        let server = Server::with_transceiver(transceiver, cfg);
        log::info!("server started on {}", server.addr());
        Ok(server)
    }
}

impl<T: Transceiver, Ctx> Server<T, Ctx> {
    pub fn with_transceiver(transceiver: T, cfg: ServerConfig<Ctx>) -> Self {
        Self {
            transceiver,
            time: 0.0,
            unix_time: 0,
            clients: FreeList::new(cfg.max_clients),
            addr_to_idx: HashMap::new(),
            id_to_idx: HashMap::new(),
            tokens: HashMap::new(),
            received: VecDeque::new(),
            cfg,
        }
    }
    fn send_to_addr(&self, buf: &[u8], addr: SocketAddr) -> Result<()> {
        self.transceiver.send(buf, addr).map_err(Into::<Error>::into)?;
        Ok(())
    }
    fn send_to_client(&mut self, packet: &Packet, idx: ClientIndex) -> Result<()> {
        let Some(conn) = self.clients.get_mut(idx) else {
            return Err(Error::ClientNotFound);
        };
        let buf = conn.channel.seal(packet)?;
        conn.last_send_time = self.time;
        let addr = conn.addr;
        self.send_to_addr(&buf, addr)
    }
    fn accepted_packet(&self, idx: ClientIndex) -> Packet {
        Packet::Accepted(AcceptedPacket {
            client_index: idx as u32,
            max_clients: self.cfg.max_clients as u32,
        })
    }
    fn remove_client(&mut self, idx: ClientIndex) {
        let Some(conn) = self.clients.remove(idx) else {
            return;
        };
        self.addr_to_idx.remove(&conn.addr);
        self.id_to_idx.remove(&conn.client_id);
        self.received.retain(|(_, from)| *from != idx);
        if let Some(ref mut cb) = self.cfg.on_disconnect {
            cb(idx, &mut self.cfg.context);
        }
    }
    fn process_request(&mut self, from: SocketAddr, buf: &[u8]) -> Result<()> {
        let request = RequestPacket::read(buf)?;
        let token = ConnectToken::decode_and_verify(
            &request.token,
            &self.cfg.public_key,
            self.cfg.application_id,
            self.unix_time,
        )?;
        if !token.endpoints.contains(&self.transceiver.addr()) {
            log::debug!("server ignored connection request. server address not in connect token");
            return Ok(());
        }
        let signature = ConnectToken::signature(&request.token);
        let entry = self
            .tokens
            .get(&signature)
            .map(|entry| (entry.accepted_addr, entry.send_sequence));
        let send_sequence = match entry {
            Some((Some(addr), _)) if addr != from => {
                log::debug!(
                    "server ignored connection request. connect token already used by {}",
                    addr
                );
                return Ok(());
            }
            Some((Some(_), _)) => {
                let Some(&idx) = self.addr_to_idx.get(&from) else {
                    log::debug!("server ignored connection request. connect token already used");
                    return Ok(());
                };
                log::trace!("server resending connection accepted packet to client {idx}");
                let accepted = self.accepted_packet(idx);
                return self.send_to_client(&accepted, idx);
            }
            Some((None, send_sequence)) => send_sequence,
            None => random_initial_sequence()?,
        };
        if self.addr_to_idx.contains_key(&from) {
            log::debug!(
                "server ignored connection request. a client with this address is already connected"
            );
            return Ok(());
        }
        if self.id_to_idx.contains_key(&token.client_id) {
            log::debug!(
                "server ignored connection request. a client with this id is already connected"
            );
            return Ok(());
        }
        let mut channel = SessionChannel::for_server(self.cfg.application_id, &token.session_keys)
            .starting_at(send_sequence);
        if self.clients.is_full() {
            log::debug!("server denied connection request. server is full");
            let buf = channel.seal(&Packet::Denied)?;
            self.tokens.insert(
                signature,
                TokenEntry {
                    accepted_addr: None,
                    expiration_timestamp: token.expiration_timestamp,
                    send_sequence: channel.sequence(),
                },
            );
            return self.send_to_addr(&buf, from);
        }
        let conn = Connection {
            client_id: token.client_id,
            addr: from,
            channel,
            last_send_time: self.time,
            last_receive_time: self.time,
            user_data: token.user_data,
        };
        let Some(idx) = self.clients.insert(conn) else {
            return Ok(());
        };
        self.tokens.insert(
            signature,
            TokenEntry {
                accepted_addr: Some(from),
                expiration_timestamp: token.expiration_timestamp,
                send_sequence,
            },
        );
        self.addr_to_idx.insert(from, idx);
        self.id_to_idx.insert(token.client_id, idx);
        log::info!(
            "server accepted client {} from {} in slot {}",
            token.client_id,
            from,
            idx
        );
        let accepted = self.accepted_packet(idx);
        self.send_to_client(&accepted, idx)?;
        if let Some(ref mut cb) = self.cfg.on_connect {
            cb(idx, &mut self.cfg.context);
        }
        Ok(())
    }
    fn process_packet(&mut self, from: SocketAddr, buf: &[u8]) -> Result<()> {
        if RequestPacket::is_request(buf) {
            return self.process_request(from, buf);
        }
        let Some(&idx) = self.addr_to_idx.get(&from) else {
            log::trace!("server ignored packet from unknown address {from}");
            return Ok(());
        };
        let Some(conn) = self.clients.get_mut(idx) else {
            return Ok(());
        };
        let packet = conn.channel.open(buf)?;
        log::trace!("server received {packet} from client {idx}");
        match packet {
            Packet::KeepAlive => conn.last_receive_time = self.time,
            Packet::Payload(payload) => {
                conn.last_receive_time = self.time;
                self.received.push_back((payload, idx));
            }
            Packet::Disconnect => {
                log::info!("server received disconnect from client {idx}");
                self.remove_client(idx);
            }
            Packet::Accepted(_) | Packet::Denied => {}
        }
        Ok(())
    }
    fn recv_packets(&mut self) {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let received = self.transceiver.recv(&mut buf).map_err(Into::<Error>::into);
            let (size, addr) = match received {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(e) => {
                    log::error!("server failed to receive packet: {e}");
                    break;
                }
            };
            if let Err(e) = self.process_packet(addr, &buf[..size]) {
                log::debug!("server ignored packet from {addr}: {e}");
            }
        }
    }
    fn check_for_timeouts(&mut self) {
        let unix_time = self.unix_time;
        self.tokens
            .retain(|_, entry| entry.expiration_timestamp > unix_time);
        let timed_out = self
            .clients
            .iter()
            .filter(|(_, conn)| conn.last_receive_time + self.cfg.connection_timeout < self.time)
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        for idx in timed_out {
            log::info!("server timed out client {idx}");
            self.remove_client(idx);
        }
    }
    fn send_keep_alives(&mut self) {
        let due = self
            .clients
            .iter()
            .filter(|(_, conn)| conn.last_send_time + self.cfg.packet_send_rate <= self.time)
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        for idx in due {
            if let Err(e) = self.send_to_client(&Packet::KeepAlive, idx) {
                log::error!("server failed to send keep-alive to client {idx}: {e}");
            }
        }
    }
    /// Advances the server by `dt` seconds; `now` is the current unix time.
    ///
    /// Handles every pending packet, drops clients that went silent, and sends keep-alives.
    pub fn update(&mut self, dt: f64, now: u64) {
        if dt.is_nan() || dt <= 0.0 {
            return;
        }
        self.time += dt;
        self.unix_time = now;
        self.recv_packets();
        self.check_for_timeouts();
        self.send_keep_alives();
    }
    /// Pops the oldest payload received from any client, along with the client's slot.
    pub fn recv(&mut self) -> Option<(Vec<u8>, ClientIndex)> {
        self.received.pop_front()
    }
    /// Sends a payload to a connected client.
    pub fn send(&mut self, payload: &[u8], client_idx: ClientIndex) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadSizeExceeded(payload.len()));
        }
        self.send_to_client(&Packet::Payload(payload.to_vec()), client_idx)
    }
    /// Drops a client, notifying it with redundant disconnect packets.
    pub fn disconnect(&mut self, client_idx: ClientIndex) -> Result<()> {
        if self.clients.get(client_idx).is_none() {
            return Err(Error::ClientNotFound);
        }
        log::debug!("server disconnecting client {client_idx}");
        for _ in 0..self.cfg.num_disconnect_packets {
            if let Err(e) = self.send_to_client(&Packet::Disconnect, client_idx) {
                log::debug!("server failed to send disconnect packet: {e}");
                break;
            }
        }
        self.remove_client(client_idx);
        Ok(())
    }
    pub fn disconnect_all(&mut self) {
        log::debug!("server disconnecting all clients");
        let indices = self.clients.iter().map(|(idx, _)| idx).collect::<Vec<_>>();
        for idx in indices {
            if let Err(e) = self.disconnect(idx) {
                log::error!("server failed to disconnect client {idx}: {e}");
            }
        }
    }
    /// Gets the local `SocketAddr` that the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.transceiver.addr()
    }
    pub fn num_connected_clients(&self) -> usize {
        self.clients.len()
    }
    pub fn max_clients(&self) -> usize {
        self.clients.capacity()
    }
    pub fn is_client_connected(&self, client_idx: ClientIndex) -> bool {
        self.clients.get(client_idx).is_some()
    }
    /// The id the connect token of the client in `client_idx` was issued for.
    pub fn client_id(&self, client_idx: ClientIndex) -> Option<u64> {
        self.clients.get(client_idx).map(|conn| conn.client_id)
    }
    pub fn client_addr(&self, client_idx: ClientIndex) -> Option<SocketAddr> {
        self.clients.get(client_idx).map(|conn| conn.addr)
    }
    /// The user data from the client's connect token.
    pub fn user_data(&self, client_idx: ClientIndex) -> Option<&[u8; USER_DATA_SIZE]> {
        self.clients.get(client_idx).map(|conn| &conn.user_data)
    }
    #[cfg(test)]
    pub(crate) fn transceiver_mut(&mut self) -> &mut T {
        &mut self.transceiver
    }
}
