//! Listen - print every notification a socket service pushes.
//!
//! Connects to `<tmp>/<service>.sock` (or `\\.\pipe\<service>` on Windows)
//! and prints events and errors until Ctrl+C or until the service hangs up.
//!
//! ```text
//! cargo run --example listen -- svc.example
//! RUST_LOG=ipcwire_client=debug cargo run --example listen
//! ```

use ipcwire_client::transport::SocketTransport;
use ipcwire_client::{Client, ConnectionState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let service = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "svc.example".to_string());

    let client = Client::builder(&service, SocketTransport::default())
        .on_event(|value| async move {
            println!("event: {}", value);
            Ok(())
        })
        .on_error(|error| async move {
            eprintln!("error: {}", error);
            Ok(())
        })
        .build()?;

    let stopper = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.disconnect().await;
        }
    });

    let mut state = client.state_changes();
    client.connect().await?;
    eprintln!("listening to {}", client.service());

    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await?;
    eprintln!("disconnected");
    Ok(())
}
