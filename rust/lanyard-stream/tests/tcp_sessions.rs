//! End-to-end TCP scenarios: echo, broadcast, admission limits,
//! reconnection and port retry.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use lanyard_core::config::{ClientLimit, TcpClientConfig, TcpServerConfig};
use lanyard_core::reactor::Reactor;
use lanyard_core::state::LinkState;
use lanyard_stream::{TcpClient, TcpServer};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn client_config(port: u16) -> TcpClientConfig {
    let mut cfg = TcpClientConfig::new("127.0.0.1", port);
    cfg.retry_interval_ms = 100;
    cfg
}

/// Start a server and wait until it reports `Listening`.
fn start_listening(server: &TcpServer, reactor: &Reactor) {
    let (tx, rx) = mpsc::channel();
    server.on_state(move |state| {
        let _ = tx.send(state);
    });
    server.start(reactor);
    loop {
        match rx.recv_timeout(EVENT_TIMEOUT).expect("server state event") {
            LinkState::Listening => return,
            LinkState::Error => panic!("server failed to bind"),
            _ => {}
        }
    }
}

/// Start a client and wait for its first `Connected`.
fn start_connected(client: &TcpClient, reactor: &Reactor) {
    let (tx, rx) = mpsc::channel();
    client.session().on_state(move |state| {
        let _ = tx.send(state);
    });
    client.start(reactor);
    loop {
        match rx.recv_timeout(EVENT_TIMEOUT).expect("client state event") {
            LinkState::Connected => return,
            LinkState::Error => panic!("client entered error state"),
            _ => {}
        }
    }
}

#[test]
fn echo_round_trip_and_disconnect_id() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let server = Arc::new(TcpServer::new(TcpServerConfig::new(port)));
    {
        let echo = server.clone();
        server.on_client_data(move |id, bytes| {
            echo.send_to(id, bytes);
        });
    }
    let (connect_tx, connect_rx) = mpsc::channel();
    server.on_client_connect(move |id, _addr| {
        let _ = connect_tx.send(id);
    });
    let (disconnect_tx, disconnect_rx) = mpsc::channel();
    server.on_client_disconnect(move |id| {
        let _ = disconnect_tx.send(id);
    });
    start_listening(&server, &reactor);

    let client = TcpClient::new(client_config(port));
    let (data_tx, data_rx) = mpsc::channel();
    client.session().on_bytes(move |bytes| {
        let _ = data_tx.send(bytes.to_vec());
    });
    start_connected(&client, &reactor);

    let connected_id = connect_rx.recv_timeout(EVENT_TIMEOUT).unwrap();

    client.session().send(b"Hello");
    let echoed = data_rx
        .recv_timeout(Duration::from_millis(500))
        .expect("echo within 500ms");
    assert_eq!(echoed, b"Hello");

    client.stop();
    let disconnected_id = disconnect_rx.recv_timeout(EVENT_TIMEOUT).unwrap();
    assert_eq!(disconnected_id, connected_id);

    server.stop();
    reactor.stop();
}

#[test]
fn send_line_appends_exactly_one_newline() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let server = TcpServer::new(TcpServerConfig::new(port));
    let (data_tx, data_rx) = mpsc::channel();
    server.on_client_data(move |_id, bytes| {
        let _ = data_tx.send(bytes.to_vec());
    });
    start_listening(&server, &reactor);

    let client = TcpClient::new(client_config(port));
    start_connected(&client, &reactor);

    client.session().send_line("status");
    let mut received = data_rx.recv_timeout(EVENT_TIMEOUT).unwrap();
    // TCP may split the payload; keep reading until the newline arrives.
    while !received.ends_with(b"\n") {
        received.extend(data_rx.recv_timeout(EVENT_TIMEOUT).unwrap());
    }
    assert_eq!(received, b"status\n");

    client.stop();
    server.stop();
    reactor.stop();
}

#[test]
fn broadcast_reaches_all_three_clients_once() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let mut cfg = TcpServerConfig::new(port);
    cfg.client_limit = ClientLimit::Bounded(3);
    let server = TcpServer::new(cfg);
    let (admitted_tx, admitted_rx) = mpsc::channel();
    server.on_client_connect(move |id, _| {
        let _ = admitted_tx.send(id);
    });
    start_listening(&server, &reactor);

    let mut clients = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let client = TcpClient::new(client_config(port));
        let (tx, rx) = mpsc::channel();
        client.session().on_bytes(move |bytes| {
            let _ = tx.send(bytes.to_vec());
        });
        start_connected(&client, &reactor);
        // The client handshake can complete before the server admits it;
        // wait for the admission event before counting on membership.
        admitted_rx.recv_timeout(EVENT_TIMEOUT).unwrap();
        clients.push(client);
        receivers.push(rx);
    }
    assert_eq!(server.client_count(), 3);

    server.broadcast_line("ping");
    for rx in &receivers {
        let mut received = rx.recv_timeout(EVENT_TIMEOUT).unwrap();
        while !received.ends_with(b"\n") {
            received.extend(rx.recv_timeout(EVENT_TIMEOUT).unwrap());
        }
        assert_eq!(received, b"ping\n");
        // Exactly once: nothing else shows up.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    for client in &clients {
        client.stop();
    }
    server.stop();
    reactor.stop();
}

#[test]
fn single_client_limit_rejects_second_peer() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let mut cfg = TcpServerConfig::new(port);
    cfg.client_limit = ClientLimit::Single;
    let server = TcpServer::new(cfg);
    let admissions = Arc::new(AtomicUsize::new(0));
    {
        let admissions = admissions.clone();
        server.on_client_connect(move |_, _| {
            admissions.fetch_add(1, Ordering::SeqCst);
        });
    }
    start_listening(&server, &reactor);

    let client_a = TcpClient::new(client_config(port));
    start_connected(&client_a, &reactor);

    // Second connection is accepted by the OS, then closed without
    // admission: the raw peer observes EOF.
    let mut rejected = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    rejected
        .set_read_timeout(Some(EVENT_TIMEOUT))
        .unwrap();
    let mut buf = [0u8; 16];
    let n = rejected.read(&mut buf).expect("EOF from rejected peer");
    assert_eq!(n, 0);

    assert_eq!(admissions.load(Ordering::SeqCst), 1);
    assert_eq!(server.client_count(), 1);

    client_a.stop();
    server.stop();
    reactor.stop();
}

#[test]
fn client_ids_are_strictly_increasing_without_reuse() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let server = TcpServer::new(TcpServerConfig::new(port));
    let (id_tx, id_rx) = mpsc::channel();
    server.on_client_connect(move |id, _| {
        let _ = id_tx.send(id);
    });
    let (gone_tx, gone_rx) = mpsc::channel();
    server.on_client_disconnect(move |id| {
        let _ = gone_tx.send(id);
    });
    start_listening(&server, &reactor);

    let mut seen = Vec::new();
    for _ in 0..4 {
        let client = TcpClient::new(client_config(port));
        start_connected(&client, &reactor);
        seen.push(id_rx.recv_timeout(EVENT_TIMEOUT).unwrap());
        client.stop();
        let gone = gone_rx.recv_timeout(EVENT_TIMEOUT).unwrap();
        assert_eq!(gone, *seen.last().unwrap());
    }
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "ids {seen:?}");

    server.stop();
    reactor.stop();
}

#[test]
fn client_reconnects_when_server_appears() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let client = TcpClient::new(client_config(port));
    let (state_tx, state_rx) = mpsc::channel();
    client.session().on_state(move |state| {
        let _ = state_tx.send(state);
    });
    client.start(&reactor);

    // Let a few connect attempts fail first.
    std::thread::sleep(Duration::from_millis(350));
    assert!(!client.session().is_connected());

    let server = TcpServer::new(TcpServerConfig::new(port));
    start_listening(&server, &reactor);

    let deadline = std::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(std::time::Instant::now())
            .expect("client should reconnect after the server appears");
        if let LinkState::Connected = state_rx.recv_timeout(remaining).unwrap() {
            break;
        }
    }

    client.stop();
    server.stop();
    reactor.stop();
}

#[test]
fn port_retry_succeeds_after_occupier_leaves() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    // Occupy the port outside the library.
    let occupier = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();

    let mut cfg = TcpServerConfig::new(port);
    cfg.enable_port_retry = true;
    cfg.max_port_retries = 5;
    cfg.port_retry_interval_ms = 100;
    let server = TcpServer::new(cfg);
    let (state_tx, state_rx) = mpsc::channel();
    server.on_state(move |state| {
        let _ = state_tx.send(state);
    });
    server.start(&reactor);

    std::thread::sleep(Duration::from_millis(250));
    drop(occupier);

    let deadline = std::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(std::time::Instant::now())
            .expect("server should start listening after the port frees up");
        match state_rx.recv_timeout(remaining).unwrap() {
            LinkState::Listening => break,
            LinkState::Error => panic!("port retry gave up too early"),
            _ => {}
        }
    }

    server.stop();
    reactor.stop();
}

#[test]
fn port_retry_exhaustion_reports_error() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();
    let _occupier = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();

    let mut cfg = TcpServerConfig::new(port);
    cfg.enable_port_retry = true;
    cfg.max_port_retries = 2;
    cfg.port_retry_interval_ms = 50;
    let server = TcpServer::new(cfg);
    let (state_tx, state_rx) = mpsc::channel();
    server.on_state(move |state| {
        let _ = state_tx.send(state);
    });
    server.start(&reactor);

    loop {
        match state_rx.recv_timeout(EVENT_TIMEOUT).unwrap() {
            LinkState::Error => break,
            LinkState::Listening => panic!("bind should not succeed while occupied"),
            _ => {}
        }
    }

    server.stop();
    reactor.stop();
}

#[test]
fn stop_before_start_is_a_no_op() {
    let client = TcpClient::new(client_config(free_port()));
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        client.session().on_state(move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    client.stop();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(client.session().state(), LinkState::Idle);
}

#[test]
fn capped_retries_end_in_error_state() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let mut cfg = client_config(port);
    cfg.retry_interval_ms = 50;
    cfg.max_retries = Some(2);
    let client = TcpClient::new(cfg);
    let (state_tx, state_rx) = mpsc::channel();
    client.session().on_state(move |state| {
        let _ = state_tx.send(state);
    });
    let errors = Arc::new(AtomicUsize::new(0));
    {
        let errors = errors.clone();
        client.session().on_error(move |_| {
            errors.fetch_add(1, Ordering::SeqCst);
        });
    }
    client.start(&reactor);

    loop {
        match state_rx.recv_timeout(EVENT_TIMEOUT).unwrap() {
            LinkState::Error => break,
            LinkState::Connected => panic!("nothing is listening on this port"),
            _ => {}
        }
    }
    assert!(errors.load(Ordering::SeqCst) >= 1);

    reactor.stop();
}

#[test]
fn writes_preserve_order_within_a_session() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let server = TcpServer::new(TcpServerConfig::new(port));
    start_listening(&server, &reactor);

    let client = TcpClient::new(client_config(port));
    start_connected(&client, &reactor);

    // Observe the raw byte sequence on the server side of the socket.
    let (raw_tx, raw_rx) = mpsc::channel();
    server.on_client_data(move |_, bytes| {
        let _ = raw_tx.send(bytes.to_vec());
    });

    for i in 0..50u8 {
        client.session().send(&[i]);
    }

    let mut received = Vec::new();
    while received.len() < 50 {
        received.extend(raw_rx.recv_timeout(EVENT_TIMEOUT).unwrap());
    }
    assert_eq!(received, (0..50).collect::<Vec<u8>>());

    client.stop();
    server.stop();
    reactor.stop();
}

#[test]
fn raw_peer_bytes_round_trip() {
    let reactor = Reactor::independent().unwrap();
    let port = free_port();

    let server = Arc::new(TcpServer::new(TcpServerConfig::new(port)));
    {
        let echo = server.clone();
        server.on_client_data(move |id, bytes| {
            echo.send_to(id, bytes);
        });
    }
    start_listening(&server, &reactor);

    let mut peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    peer.set_read_timeout(Some(EVENT_TIMEOUT)).unwrap();
    peer.write_all(b"abc").unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 16];
    while received.len() < 3 {
        let n = peer.read(&mut buf).unwrap();
        assert!(n > 0, "unexpected EOF");
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"abc");

    server.stop();
    reactor.stop();
}
