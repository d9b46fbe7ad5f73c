use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr},
    rc::Rc,
    sync::mpsc::{self, Receiver, Sender},
};

use crate::transceiver::Transceiver;

#[derive(Debug, Clone)]
pub struct PacketEntry {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub packet: Vec<u8>,
}

pub struct Channel {
    pub tx: Sender<PacketEntry>,
    pub rx: Receiver<PacketEntry>,
}

pub type RoutingTable = Rc<RefCell<HashMap<u16, Channel>>>;

#[derive(Clone, Copy, Default)]
pub struct SimulationConfig {
    pub packet_loss_percent: f64,
    pub duplicate_packet_percent: f64,
}

/// In-memory transceiver: every simulator registers a mailbox under its port on localhost and
/// delivers datagrams straight into the mailbox of the destination port.
pub struct NetworkSimulator {
    pub port: u16,
    pub cfg: SimulationConfig,
    pub routing_table: RoutingTable,
    num_sent: Cell<usize>,
}

impl NetworkSimulator {
    pub fn new(port: u16, table: RoutingTable) -> Self {
        let (tx, rx) = mpsc::channel::<PacketEntry>();
        table.borrow_mut().insert(port, Channel { tx, rx });
        Self {
            port,
            cfg: SimulationConfig::default(),
            routing_table: table,
            num_sent: Cell::new(0),
        }
    }
    /// Number of datagrams handed to `send`, dropped ones included.
    pub fn num_sent(&self) -> usize {
        self.num_sent.get()
    }
    fn roll(percent: f64) -> bool {
        percent >= 100.0 || (percent > 0.0 && rand_float(0.0..100.0) < percent)
    }
}

fn rand_float(range: std::ops::Range<f64>) -> f64 {
    use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
    let rand = OsRng.next_u32() as f64 / u32::MAX as f64;
    range.start + rand * (range.end - range.start)
}

impl Transceiver for NetworkSimulator {
    type IntoError = io::Error;

    fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, Self::IntoError> {
        let table = self.routing_table.borrow();
        let Some(rx) = table.get(&self.port).map(|c| &c.rx) else {
            return Ok(None);
        };
        let Ok(entry) = rx.try_recv() else {
            return Ok(None);
        };
        if entry.to != self.addr() {
            return Err(io::Error::new(
                ErrorKind::Other,
                "received packet for wrong address",
            ));
        }
        let len = entry.packet.len().min(buf.len());
        buf[..len].copy_from_slice(&entry.packet[..len]);
        Ok(Some((len, entry.from)))
    }

    fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, Self::IntoError> {
        self.num_sent.set(self.num_sent.get() + 1);
        let table = self.routing_table.borrow();
        let Some(tx) = table.get(&addr.port()).map(|c| &c.tx) else {
            return Ok(0);
        };
        if Self::roll(self.cfg.packet_loss_percent) {
            log::trace!("simulator dropped packet to {addr}");
            return Ok(0);
        }
        let entry = PacketEntry {
            from: self.addr(),
            to: addr,
            packet: buf.to_vec(),
        };
        tx.send(entry.clone()).ok();
        if Self::roll(self.cfg.duplicate_packet_percent) {
            tx.send(entry).ok();
        }
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{Client, ClientConfig, ClientState, ConnectionFailure},
        consts::{CONNECT_TOKEN_SIZE, DEFAULT_CONNECTION_TIMEOUT_SECONDS, MAX_PACKET_SIZE},
        issuer::TokenIssuer,
        keys::KeyPair,
        server::{Server, ServerConfig},
        Error,
    };

    const APPLICATION_ID: u64 = 0x11223344;
    const NOW: u64 = 1_700_000_000;
    const SERVER_PORT: u16 = 50000;

    fn enable_logging() {
        // Uncomment this to enable logging

        // static LOGGER_CELL: std::sync::OnceLock<()> = std::sync::OnceLock::new();
        // LOGGER_CELL.get_or_init(|| {
        //     env_logger::Builder::new()
        //         .filter(None, log::LevelFilter::Debug)
        //         .init();
        // });
    }

    struct World {
        table: RoutingTable,
        issuer: TokenIssuer,
        server: Server<NetworkSimulator>,
        time: f64,
    }

    impl World {
        fn new(max_clients: usize) -> Self {
            enable_logging();
            let table: RoutingTable = Rc::new(RefCell::new(HashMap::new()));
            let issuer = TokenIssuer::new(APPLICATION_ID, KeyPair::generate().unwrap());
            let cfg = ServerConfig::new(APPLICATION_ID, issuer.key_pair().public_key())
                .max_clients(max_clients);
            let server = Server::with_transceiver(
                NetworkSimulator::new(SERVER_PORT, table.clone()),
                cfg,
            );
            Self {
                table,
                issuer,
                server,
                time: 0.0,
            }
        }
        fn now(&self) -> u64 {
            NOW + self.time as u64
        }
        fn token(&self, client_id: u64) -> [u8; CONNECT_TOKEN_SIZE] {
            self.issuer
                .token(client_id, SocketAddr::from((Ipv4Addr::LOCALHOST, SERVER_PORT)))
                .generate(self.now())
                .unwrap()
        }
        fn client(&self, port: u16) -> Client<NetworkSimulator> {
            let cfg = ClientConfig::new(APPLICATION_ID, self.issuer.key_pair().public_key());
            Client::with_transceiver(NetworkSimulator::new(port, self.table.clone()), cfg)
        }
    }

    const DELTA: f64 = 1. / 10.;

    #[test]
    fn client_server_connect_send_recv() {
        let mut world = World::new(4);
        let mut client = world.client(40000);
        client.connect_at(&world.token(123), world.now()).unwrap();

        for _ in 0..50 {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            if client.is_connected() {
                break;
            }
            world.time += DELTA;
        }
        assert!(client.is_connected());
        assert_eq!(client.client_index(), Some(0));
        assert_eq!(client.max_clients(), Some(4));
        assert_eq!(world.server.num_connected_clients(), 1);
        assert_eq!(world.server.client_id(0), Some(123));

        let mut payload = vec![b'a'];
        for _ in 0..200 {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            client.send(&payload).unwrap();
            if let Some(pkt) = client.recv() {
                payload = pkt.clone();
                payload.push(payload.last().unwrap() + 1);
            }

            world.server.update(DELTA, now);
            if let Some((pkt, client_idx)) = world.server.recv() {
                assert_eq!(client_idx, 0);
                payload = pkt.clone();
                payload.push(payload.last().unwrap() + 1);
                world.server.send(&payload, client_idx).unwrap();
            }

            if payload.contains(&(b'z')) {
                break;
            }
            world.time += DELTA;
        }
        assert_eq!(payload, b"abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn client_times_out_when_server_goes_silent() {
        let mut world = World::new(4);
        let mut client = world.client(40000);
        client.connect_at(&world.token(123), world.now()).unwrap();

        while !client.is_connected() && !client.is_error() {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        assert!(client.is_connected());

        // now don't update the server for a while and ensure the client times out
        let num_iterations = (1.5 * DEFAULT_CONNECTION_TIMEOUT_SECONDS / DELTA).ceil() as usize;
        let mut failure = None;
        for _ in 0..num_iterations {
            if let Err(Error::ConnectionFailed(f)) = client.update(DELTA, world.now()) {
                failure = Some(f);
            }
            world.time += DELTA;
        }
        assert_eq!(failure, Some(ConnectionFailure::ConnectionTimedOut));
        assert_eq!(
            client.state(),
            ClientState::Failed(ConnectionFailure::ConnectionTimedOut)
        );
    }

    #[test]
    fn server_times_out_silent_client() {
        let mut world = World::new(4);
        let mut client = world.client(40000);
        client.connect_at(&world.token(7), world.now()).unwrap();
        while !client.is_connected() {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        assert_eq!(world.server.num_connected_clients(), 1);

        let num_iterations = (1.5 * DEFAULT_CONNECTION_TIMEOUT_SECONDS / DELTA).ceil() as usize;
        for _ in 0..num_iterations {
            world.server.update(DELTA, world.now());
            world.time += DELTA;
        }
        assert_eq!(world.server.num_connected_clients(), 0);
    }

    #[test]
    fn client_disconnect_frees_server_slot() {
        let mut world = World::new(1);
        let mut client = world.client(40000);
        client.connect_at(&world.token(1), world.now()).unwrap();
        while !client.is_connected() {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        client.disconnect();
        assert_eq!(client.state(), ClientState::Disconnected);
        world.server.update(DELTA, world.now());
        assert_eq!(world.server.num_connected_clients(), 0);
    }

    #[test]
    fn server_disconnect_reaches_client() {
        let mut world = World::new(1);
        let mut client = world.client(40000);
        client.connect_at(&world.token(1), world.now()).unwrap();
        while !client.is_connected() {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        world.server.disconnect(0).unwrap();
        assert_eq!(world.server.num_connected_clients(), 0);
        world.time += DELTA;
        client.update(DELTA, world.now()).unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn full_server_denies_connection() {
        let mut world = World::new(1);
        let mut first = world.client(40000);
        let mut second = world.client(40001);
        first.connect_at(&world.token(1), world.now()).unwrap();
        while !first.is_connected() {
            let now = world.now();
            first.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }

        second.connect_at(&world.token(2), world.now()).unwrap();
        let mut failure = None;
        for _ in 0..20 {
            let now = world.now();
            first.update(DELTA, now).unwrap();
            if let Err(Error::ConnectionFailed(f)) = second.update(DELTA, now) {
                failure = Some(f);
                break;
            }
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        assert_eq!(failure, Some(ConnectionFailure::ConnectionDenied));
        assert!(first.is_connected());
        assert_eq!(world.server.num_connected_clients(), 1);
    }

    #[test]
    fn denied_client_reconnects_with_same_token() {
        let mut world = World::new(1);
        let mut first = world.client(40000);
        let mut second = world.client(40001);
        let first_token = world.token(1);
        let second_token = world.token(2);
        first.connect_at(&first_token, world.now()).unwrap();
        while !first.is_connected() {
            let now = world.now();
            first.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }

        second.connect_at(&second_token, world.now()).unwrap();
        second.update(DELTA, world.now()).unwrap();
        world.server.update(DELTA, world.now());
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let (len, _) = second.transceiver_mut().recv(&mut buf).unwrap().unwrap();
        let denied = buf[..len].to_vec();
        let second_addr = second.addr();
        world.server.transceiver_mut().send(&denied, second_addr).unwrap();
        assert!(matches!(
            second.update(DELTA, world.now()),
            Err(Error::ConnectionFailed(ConnectionFailure::ConnectionDenied))
        ));

        first.disconnect();
        world.server.update(DELTA, world.now());
        assert_eq!(world.server.num_connected_clients(), 0);

        // a recorded denial must not end the second attempt
        second.connect_at(&second_token, world.now()).unwrap();
        world.server.transceiver_mut().send(&denied, second_addr).unwrap();
        for _ in 0..10 {
            let now = world.now();
            second.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        assert!(second.is_connected());
        assert_eq!(world.server.client_id(0), Some(2));

        // the first token was consumed
        first.connect_at(&first_token, world.now()).unwrap();
        for _ in 0..10 {
            let now = world.now();
            first.update(DELTA, now).unwrap();
            second.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        assert!(first.is_pending());
        assert_eq!(world.server.num_connected_clients(), 1);
    }

    #[test]
    fn replayed_token_from_another_address_is_ignored() {
        let mut world = World::new(4);
        let token = world.token(9);
        let mut client = world.client(40000);
        let mut thief = world.client(40001);
        client.connect_at(&token, world.now()).unwrap();
        while !client.is_connected() {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }

        thief.connect_at(&token, world.now()).unwrap();
        for _ in 0..20 {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            let _ = thief.update(DELTA, now);
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        assert!(!thief.is_connected());
        assert_eq!(world.server.num_connected_clients(), 1);
        assert!(client.is_connected());
    }

    #[test]
    fn lost_acceptance_is_resent() {
        let mut world = World::new(4);
        let mut client = world.client(40000);
        client.connect_at(&world.token(11), world.now()).unwrap();
        world.server.transceiver_mut().cfg.packet_loss_percent = 100.0;
        for _ in 0..3 {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        assert!(client.is_pending());
        assert_eq!(world.server.num_connected_clients(), 1);

        world.server.transceiver_mut().cfg.packet_loss_percent = 0.0;
        for _ in 0..5 {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            world.time += DELTA;
        }
        assert!(client.is_connected());
        assert_eq!(world.server.num_connected_clients(), 1);
    }

    #[test]
    fn multiple_clients() {
        let mut world = World::new(4);
        let mut clients = (0..3)
            .map(|i| world.client(40000 + i as u16))
            .collect::<Vec<_>>();
        for (i, client) in clients.iter_mut().enumerate() {
            client.connect_at(&world.token(i as u64 + 1), world.now()).unwrap();
        }

        for _ in 0..50 {
            let now = world.now();
            for client in clients.iter_mut() {
                client.update(DELTA, now).unwrap();
            }
            world.server.update(DELTA, now);
            if clients.iter().all(|c| c.is_connected()) {
                break;
            }
            world.time += DELTA;
        }
        assert_eq!(world.server.num_connected_clients(), 3);

        let payload = b"hello";
        let mut server_received = [false; 3];
        let mut client_received = [false; 3];
        for _ in 0..50 {
            let now = world.now();
            for (i, client) in clients.iter_mut().enumerate() {
                client.update(DELTA, now).unwrap();
                if let Some(pkt) = client.recv() {
                    assert_eq!(pkt, payload);
                    client_received[i] = true;
                }
                client.send(payload).unwrap();
            }
            world.server.update(DELTA, now);
            while let Some((pkt, client_idx)) = world.server.recv() {
                assert_eq!(pkt, payload);
                server_received[client_idx] = true;
                world.server.send(payload, client_idx).unwrap();
            }
            if server_received.iter().chain(client_received.iter()).all(|&r| r) {
                break;
            }
            world.time += DELTA;
        }
        assert_eq!(server_received, [true; 3]);
        assert_eq!(client_received, [true; 3]);
    }

    #[test]
    fn lossy_network_still_connects() {
        let mut world = World::new(4);
        let mut client = world.client(40000);
        client.transceiver_mut().cfg = SimulationConfig {
            packet_loss_percent: 25.0,
            duplicate_packet_percent: 10.0,
        };
        world.server.transceiver_mut().cfg = SimulationConfig {
            packet_loss_percent: 25.0,
            duplicate_packet_percent: 10.0,
        };
        client.connect_at(&world.token(3), world.now()).unwrap();
        for _ in 0..40 {
            let now = world.now();
            client.update(DELTA, now).unwrap();
            world.server.update(DELTA, now);
            if client.is_connected() {
                break;
            }
            world.time += DELTA;
        }
        assert!(client.is_connected());
    }
}
