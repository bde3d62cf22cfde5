//! End-to-end tests against a framed Unix socket service.

#![cfg(unix)]

use std::time::Duration;

use ipcwire_client::codec::MsgPackCodec;
use ipcwire_client::protocol::{build_frame, kind, FrameBuffer};
use ipcwire_client::transport::SocketTransport;
use ipcwire_client::{Client, ConnectionState, ErrorDescriptor, IpcError, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn bind(dir: &tempfile::TempDir, service: &str) -> (SocketTransport, UnixListener) {
    let transport = SocketTransport::new(dir.path());
    let listener = UnixListener::bind(dir.path().join(format!("{service}.sock"))).unwrap();
    (transport, listener)
}

async fn write_event(stream: &mut UnixStream, value: &Value) {
    let payload = MsgPackCodec::encode(value).unwrap();
    stream
        .write_all(&build_frame(kind::EVENT, &payload))
        .await
        .unwrap();
}

async fn write_error(stream: &mut UnixStream, error: &ErrorDescriptor) {
    let payload = MsgPackCodec::encode(error).unwrap();
    stream
        .write_all(&build_frame(kind::ERROR, &payload))
        .await
        .unwrap();
}

async fn read_message(stream: &mut UnixStream, frames: &mut FrameBuffer) -> Value {
    let mut buf = [0u8; 1024];
    loop {
        let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
        assert!(n > 0, "client closed before sending a message");
        if let Some(frame) = frames.push(&buf[..n]).unwrap().into_iter().next() {
            assert!(frame.is_message());
            return MsgPackCodec::decode(frame.payload()).unwrap();
        }
    }
}

fn channels(
    client: &Client,
) -> (
    mpsc::UnboundedReceiver<Value>,
    mpsc::UnboundedReceiver<ErrorDescriptor>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    client.on_event(move |value| {
        let tx = event_tx.clone();
        async move {
            tx.send(value).ok();
            Ok(())
        }
    });
    client.on_error(move |error| {
        let tx = error_tx.clone();
        async move {
            tx.send(error).ok();
            Ok(())
        }
    });
    (event_rx, error_rx)
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_events_and_errors_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, listener) = bind(&dir, "svc.example");
    let client = Client::new("svc.example", transport).unwrap();
    let (mut events, mut errors) = channels(&client);

    client.connect().await.unwrap();
    let (mut service, _) = listener.accept().await.unwrap();

    write_event(&mut service, &Value::from("ping")).await;
    write_event(
        &mut service,
        &Value::dictionary([("count", Value::from(3)), ("ok", Value::from("yes"))]),
    )
    .await;
    write_error(&mut service, &ErrorDescriptor::Service("quota".into())).await;

    assert_eq!(recv(&mut events).await, Value::from("ping"));
    let second = recv(&mut events).await;
    assert_eq!(second.get("count"), Some(&Value::from(3)));
    assert_eq!(
        recv(&mut errors).await,
        ErrorDescriptor::Service("quota".into())
    );

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The service sees end of stream once the client releases the socket.
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, service.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_emit_reaches_service() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, listener) = bind(&dir, "svc.example");
    let client = Client::new("svc.example", transport).unwrap();

    client.connect().await.unwrap();
    let (mut service, _) = listener.accept().await.unwrap();

    client.emit(Value::from("hello")).await.unwrap();
    client.emit(Value::from(7)).await.unwrap();

    let mut frames = FrameBuffer::new();
    assert_eq!(
        read_message(&mut service, &mut frames).await,
        Value::from("hello")
    );
    assert_eq!(read_message(&mut service, &mut frames).await, Value::from(7));

    client.disconnect().await;
}

#[tokio::test]
async fn test_service_close_reports_connection_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, listener) = bind(&dir, "svc.example");
    let client = Client::new("svc.example", transport).unwrap();
    let (mut events, mut errors) = channels(&client);

    client.connect().await.unwrap();
    let (mut service, _) = listener.accept().await.unwrap();

    write_event(&mut service, &Value::from("bye")).await;
    drop(service);

    assert_eq!(recv(&mut events).await, Value::from("bye"));
    assert_eq!(recv(&mut errors).await, ErrorDescriptor::ConnectionInvalid);

    let mut changes = client.state_changes();
    timeout(WAIT, changes.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_truncated_frame_reports_interruption() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, listener) = bind(&dir, "svc.example");
    let client = Client::new("svc.example", transport).unwrap();
    let (_events, mut errors) = channels(&client);

    client.connect().await.unwrap();
    let (mut service, _) = listener.accept().await.unwrap();

    let payload = MsgPackCodec::encode(&Value::from("cut short")).unwrap();
    let frame = build_frame(kind::EVENT, &payload);
    service.write_all(&frame[..frame.len() - 2]).await.unwrap();
    drop(service);

    assert_eq!(
        recv(&mut errors).await,
        ErrorDescriptor::ConnectionInterrupted
    );
    assert_eq!(recv(&mut errors).await, ErrorDescriptor::ConnectionInvalid);
}

#[tokio::test]
async fn test_malformed_payload_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (transport, listener) = bind(&dir, "svc.example");
    let client = Client::new("svc.example", transport).unwrap();
    let (mut events, mut errors) = channels(&client);

    client.connect().await.unwrap();
    let (mut service, _) = listener.accept().await.unwrap();

    service
        .write_all(&build_frame(kind::EVENT, &[0xc1]))
        .await
        .unwrap();
    write_event(&mut service, &Value::from("fine")).await;

    assert!(matches!(
        recv(&mut errors).await,
        ErrorDescriptor::Malformed(_)
    ));
    assert_eq!(recv(&mut events).await, Value::from("fine"));

    client.disconnect().await;
}

#[tokio::test]
async fn test_no_listener_is_transport_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new("svc.absent", SocketTransport::new(dir.path())).unwrap();

    assert!(matches!(
        client.connect().await,
        Err(IpcError::TransportUnavailable(_))
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
