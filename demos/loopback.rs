//! Loopback - drive a client from an in-process service.
//!
//! The service side pushes a few events and an error, reads back what the
//! client emitted, then hangs up.

use std::time::Duration;

use ipcwire_client::transport::MemoryTransport;
use ipcwire_client::{Client, ConnectionState, ErrorDescriptor, HandlerError, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("ipcwire_client=debug")
        .init();

    let transport = MemoryTransport::new();
    let service = transport.register("svc.example");

    let client = Client::new("svc.example", transport)?;
    let replies = client.clone();
    client.on_event(move |value: Value| {
        let client = replies.clone();
        async move {
            println!("event: {}", value);
            if let Some(n) = value.get("progress").and_then(Value::as_i64) {
                client.emit(Value::dictionary([("ack", Value::from(n))])).await?;
            }
            Ok::<(), HandlerError>(())
        }
    });
    client.on_error(|error| async move {
        println!("error: {}", error);
        Ok(())
    });

    let mut state = client.state_changes();
    client.connect().await?;

    for step in 1..=3 {
        service.send_event(Value::dictionary([("progress", Value::from(step * 33))]));
    }
    service.send_error(ErrorDescriptor::Service("quota nearly exhausted".into()));

    for _ in 1..=3 {
        let ack = tokio::time::timeout(Duration::from_secs(1), service.next_message()).await?;
        if let Some(ack) = ack {
            println!("service got: {}", ack);
        }
    }

    service.hang_up();
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await?;
    println!("done, state = {}", client.state());
    Ok(())
}
