//! Line-oriented TCP chat client reading from stdin.
//!
//! Run an echo server first, then `cargo run --example chat_client`.

use std::io::BufRead;

use lanyard::Channel;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let client = lanyard::tcp_client("127.0.0.1", 9000)
        .retry_interval(1000)
        .on_connect(|| println!("connected; type lines to send"))
        .on_disconnect(|| println!("disconnected, retrying"))
        .on_data(|bytes| print!("{}", String::from_utf8_lossy(bytes)))
        .on_error(|message| eprintln!("error: {message}"))
        .build()?;
    client.start();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line == "/quit" {
            break;
        }
        client.send_line(&line);
    }

    client.stop();
    Ok(())
}
