//! Builder validation and wrapper wiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use lanyard::{BuildError, Channel, ErrorHub, LinkState};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn rejects_invalid_host() {
    let err = lanyard::tcp_client("not a host", 9000).build().unwrap_err();
    match err {
        BuildError::Validation(err) => assert_eq!(err.field, "host"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn rejects_port_zero() {
    assert!(lanyard::tcp_client("localhost", 0).build().is_err());
    assert!(lanyard::tcp_server(0).build().is_err());
}

#[test]
fn rejects_undersized_client_limit() {
    for limit in [0, 1] {
        let err = lanyard::tcp_server(free_port())
            .limited_clients(limit)
            .build()
            .unwrap_err();
        match err {
            BuildError::Validation(err) => assert_eq!(err.field, "client_limit"),
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[test]
fn rejects_bad_serial_parameters() {
    assert!(lanyard::serial("relative/path", 115_200).build().is_err());
    assert!(lanyard::serial("/dev/ttyUSB0", 10).build().is_err());
    assert!(
        lanyard::serial("/dev/ttyUSB0", 115_200)
            .parity("mark")
            .build()
            .is_err()
    );
    assert!(
        lanyard::serial("/dev/ttyUSB0", 115_200)
            .data_bits(9)
            .build()
            .is_err()
    );
}

#[test]
fn accepts_windows_style_devices() {
    // Validation passes; no port is opened until start().
    assert!(lanyard::serial("COM3", 9600).parity("EVEN").build().is_ok());
}

#[test]
fn configuration_errors_reach_the_hub() {
    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = seen.clone();
        ErrorHub::global().subscribe(move |info| {
            if info.component == "tcp_client" && info.operation == "build" {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
    let _ = lanyard::tcp_client("localhost", 0).build();
    assert!(seen.load(Ordering::SeqCst) >= 1);
}

#[test]
fn auto_start_connects_without_an_explicit_start() {
    let port = free_port();

    let server = lanyard::tcp_server(port)
        .independent_reactor(true)
        .auto_start(true)
        .build()
        .unwrap();

    // Wait for the listener to come up.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !server.is_listening() {
        assert!(std::time::Instant::now() < deadline, "server never listened");
        std::thread::sleep(Duration::from_millis(10));
    }

    let (tx, rx) = mpsc::channel();
    let client = lanyard::tcp_client("127.0.0.1", port)
        .independent_reactor(true)
        .retry_interval(100)
        .on_connect(move || {
            let _ = tx.send(());
        })
        .auto_start(true)
        .build()
        .unwrap();

    rx.recv_timeout(Duration::from_secs(2))
        .expect("auto-started client should connect");
    assert!(client.is_connected());
    assert_eq!(client.state(), LinkState::Connected);

    client.stop();
    server.stop();
}

#[test]
fn channel_trait_objects_cover_all_variants() {
    let port = free_port();
    let channels: Vec<Box<dyn Channel>> = vec![
        Box::new(lanyard::tcp_client("127.0.0.1", port).build().unwrap()),
        Box::new(lanyard::tcp_server(port).build().unwrap()),
        Box::new(lanyard::serial("/dev/ttyUSB0", 115_200).build().unwrap()),
    ];
    for channel in &channels {
        assert!(!channel.is_connected());
        // Not started: sends drop silently, stop is a no-op.
        channel.send(b"ignored");
        channel.stop();
    }
}

#[test]
fn disconnect_parity_across_reconnects() {
    let port = free_port();

    let server = lanyard::tcp_server(port)
        .independent_reactor(true)
        .auto_start(true)
        .build()
        .unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !server.is_listening() {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(10));
    }

    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));
    let (connected_tx, connected_rx) = mpsc::channel();

    let client = {
        let connects = connects.clone();
        let disconnects = disconnects.clone();
        lanyard::tcp_client("127.0.0.1", port)
            .independent_reactor(true)
            .retry_interval(100)
            .on_connect(move || {
                connects.fetch_add(1, Ordering::SeqCst);
                let _ = connected_tx.send(());
            })
            .on_disconnect(move || {
                disconnects.fetch_add(1, Ordering::SeqCst);
            })
            .auto_start(true)
            .build()
            .unwrap()
    };

    connected_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    client.stop();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while disconnects.load(Ordering::SeqCst) == 0 {
        assert!(std::time::Instant::now() < deadline, "no disconnect event");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        connects.load(Ordering::SeqCst),
        disconnects.load(Ordering::SeqCst)
    );

    server.stop();
}
