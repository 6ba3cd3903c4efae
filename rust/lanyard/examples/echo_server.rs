//! Multi-client echo server.
//!
//! Run with `cargo run --example echo_server`, then connect with netcat:
//! `nc 127.0.0.1 9000`.

use lanyard::Channel;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = lanyard::tcp_server(9000)
        .unlimited_clients()
        .on_client_connect(|id, addr| println!("client {id} connected from {addr}"))
        .on_client_disconnect(|id| println!("client {id} disconnected"))
        .on_error(|message| eprintln!("server error: {message}"))
        .build()?;

    // Echo every chunk back to the peer that sent it.
    let echo = std::sync::Arc::new(server);
    {
        let echo2 = echo.clone();
        echo.on_client_data(move |id, bytes| {
            echo2.send_to(id, bytes);
        });
    }

    echo.start();
    println!("echo server listening on 127.0.0.1:9000, ctrl-c to quit");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
