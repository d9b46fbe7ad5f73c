use std::{
    sync::mpsc::{self, TryRecvError},
    thread,
    time::Duration,
};

use cute_net::{
    state_to_string, Client, ClientConfig, ClientState, Clock, KeyPair, Server, ServerConfig,
    TokenIssuer,
};

// Identifies the game or application within packets. Any value works as long as clients and
// servers agree on it.
const APPLICATION_ID: u64 = 0;
const SERVER_ADDR: &str = "127.0.0.1:5001";

fn main() {
    env_logger::Builder::new()
        .filter(None, log::LevelFilter::Info)
        .init();

    // Real deployments load the key pair from secure storage on the backend and only ship the
    // public key to clients and servers.
    let key_pair = KeyPair::generate().unwrap();
    let public_key = key_pair.public_key();
    let issuer = TokenIssuer::new(APPLICATION_ID, key_pair);

    let cfg = ServerConfig::new(APPLICATION_ID, public_key).on_connect(|client_idx, _| {
        log::info!("`on_connect` callback called for client {client_idx}");
    });
    let mut server = Server::new(SERVER_ADDR, cfg).unwrap();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let server_thread = thread::spawn(move || {
        let mut clock = Clock::new();
        loop {
            let (dt, now) = clock.tick().unwrap();
            server.update(dt, now);
            while let Some((payload, client_idx)) = server.recv() {
                println!(
                    "server received from client {client_idx}: {}",
                    String::from_utf8_lossy(&payload)
                );
            }
            match stop_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }
            thread::sleep(Duration::from_millis(10));
        }
        server.disconnect_all();
    });

    // Must be unique for each player.
    let client_id = 5;
    let now = cute_net::time_now_secs().unwrap();
    let token = issuer
        .token(client_id, SERVER_ADDR)
        .ttl_seconds(60)
        .handshake_timeout(5)
        .generate(now)
        .unwrap();

    let cfg = ClientConfig::new(APPLICATION_ID, public_key).on_state_change(|from, to, _| {
        if let (ClientState::SendingConnectionRequest, ClientState::Connected) = (from, to) {
            println!("Connected! Disconnecting in a few seconds.");
        }
    });
    let mut client = Client::new(cfg).unwrap();
    client.connect(&token).unwrap();
    println!("Attempting to connect to server on {SERVER_ADDR}.");

    let mut clock = Clock::new();
    let mut elapsed = 0.0;
    let mut since_send = 0.0;
    while elapsed < 10.0 {
        let (dt, now) = clock.tick().unwrap();
        elapsed += dt;
        if client.update(dt, now).is_err() || client.is_error() {
            println!(
                "Client encountered an error: {}.",
                state_to_string(client.state())
            );
            break;
        }
        if client.is_connected() {
            since_send += dt;
            if since_send > 2.0 {
                client.send(b"What's up over there, Mr. Server?").unwrap();
                since_send = 0.0;
            }
        }
        thread::sleep(Duration::from_millis(16));
    }

    client.disconnect();
    stop_tx.send(()).unwrap();
    server_thread.join().unwrap();
}
