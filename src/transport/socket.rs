//! Platform socket transport.
//!
//! - Unix: Unix Domain Socket at `<dir>/<service>.sock`
//! - Windows: Named Pipe at `\\.\pipe\<service>`
//!
//! Inbound bytes are framed by [`FrameBuffer`] and decoded with
//! [`MsgPackCodec`]. Outbound messages go through the writer task.
//!
//! # Example
//!
//! ```ignore
//! use ipcwire_client::transport::SocketTransport;
//! use ipcwire_client::Client;
//!
//! let client = Client::new("svc.example", SocketTransport::new("/run/ipcwire"))?;
//! client.connect().await?;
//! ```

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Connection, Transport};
use crate::codec::MsgPackCodec;
use crate::error::{IpcError, Result};
use crate::handler::BoxFuture;
use crate::notification::{ErrorDescriptor, Notification};
use crate::protocol::{kind, Frame, FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::service::ServiceIdentifier;
use crate::value::Value;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// Longest endpoint path accepted, in bytes.
///
/// `sun_path` is 104 bytes on macOS and the BSDs (108 on Linux), including
/// the terminating NUL.
#[cfg(unix)]
pub const MAX_SOCKET_PATH_LEN: usize = 103;

/// Longest endpoint path accepted, in bytes.
#[cfg(windows)]
pub const MAX_SOCKET_PATH_LEN: usize = 256;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// How long `close()` waits for queued outbound frames to be flushed.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for socket connections.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Inbound frames larger than this end the stream as malformed.
    pub max_payload_size: u32,
    /// Outbound frames that may be queued before `send` waits.
    pub channel_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Transport over Unix domain sockets or Windows named pipes.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    dir: PathBuf,
    config: SocketConfig,
}

impl SocketTransport {
    /// Services are looked up as sockets inside `dir` (ignored on Windows).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config: SocketConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `service` is expected to listen.
    pub fn endpoint_path(&self, service: &ServiceIdentifier) -> PathBuf {
        #[cfg(unix)]
        {
            self.dir.join(format!("{}.sock", service))
        }

        #[cfg(windows)]
        {
            PathBuf::from(format!(r"\\.\pipe\{}", service))
        }
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl Transport for SocketTransport {
    fn validate(&self, service: &ServiceIdentifier) -> Result<()> {
        let path = self.endpoint_path(service);
        let len = path.as_os_str().len();
        if len > MAX_SOCKET_PATH_LEN {
            return Err(IpcError::InvalidIdentifier(format!(
                "endpoint path {} is {} bytes, limit is {}",
                path.display(),
                len,
                MAX_SOCKET_PATH_LEN
            )));
        }
        Ok(())
    }

    fn open<'a>(
        &'a self,
        service: &'a ServiceIdentifier,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>>> {
        Box::pin(async move {
            let path = self.endpoint_path(service);
            let (reader, writer) = platform::connect(&path).await.map_err(|e| {
                IpcError::TransportUnavailable(format!("{}: {}", path.display(), e))
            })?;

            tracing::debug!(service = %service, path = %path.display(), "Socket connected");

            let connection = SocketConnection::new(service, reader, writer, &self.config);
            Ok(Box::new(connection) as Box<dyn Connection>)
        })
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[cfg(unix)]
mod platform {
    use super::*;
    use tokio::net::UnixStream;

    pub(super) async fn connect(path: &Path) -> std::io::Result<(BoxedReader, BoxedWriter)> {
        let stream = UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use tokio::net::windows::named_pipe::ClientOptions;

    pub(super) async fn connect(path: &Path) -> std::io::Result<(BoxedReader, BoxedWriter)> {
        let pipe = ClientOptions::new().open(path)?;
        let (reader, writer) = tokio::io::split(pipe);
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Turns the inbound byte stream into notifications.
struct FrameReader {
    stream: BoxedReader,
    frames: FrameBuffer,
    buf: Vec<u8>,
    pending: VecDeque<Notification>,
    finished: bool,
}

impl FrameReader {
    fn new(stream: BoxedReader, max_payload_size: u32) -> Self {
        Self {
            stream,
            frames: FrameBuffer::with_max_payload(max_payload_size),
            buf: vec![0u8; READ_CHUNK_SIZE],
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next notification, or `None` once the stream has ended.
    ///
    /// Cancel safe: bytes are only consumed by a completed read.
    async fn next(&mut self) -> Option<Notification> {
        loop {
            if let Some(notification) = self.pending.pop_front() {
                return Some(notification);
            }
            if self.finished {
                return None;
            }

            let n = match self.stream.read(&mut self.buf).await {
                Ok(0) => {
                    self.finished = true;
                    if self.frames.has_partial_frame() {
                        tracing::warn!(
                            buffered = self.frames.len(),
                            "Socket closed mid-frame"
                        );
                        return Some(Notification::Error(ErrorDescriptor::ConnectionInterrupted));
                    }
                    return None;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "Socket read failed");
                    self.finished = true;
                    return Some(Notification::Error(ErrorDescriptor::ConnectionInterrupted));
                }
            };

            let mut frames = Vec::new();
            let pushed = self.frames.push_into(&self.buf[..n], &mut frames);
            self.pending.extend(frames.into_iter().map(decode_frame));

            if let Err(e) = pushed {
                tracing::warn!(error = %e, "Unreadable frame, ending stream");
                self.finished = true;
                self.pending
                    .push_back(Notification::Error(ErrorDescriptor::Malformed(e.to_string())));
            }
        }
    }
}

fn decode_frame(frame: Frame) -> Notification {
    let decoded = match frame.kind() {
        kind::EVENT => MsgPackCodec::decode::<Value>(frame.payload()).map(Notification::Event),
        kind::ERROR => {
            MsgPackCodec::decode::<ErrorDescriptor>(frame.payload()).map(Notification::Error)
        }
        other => Err(IpcError::Protocol(format!(
            "unexpected frame kind 0x{:02x} from service",
            other
        ))),
    };

    decoded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Dropping undecodable payload");
        Notification::Error(ErrorDescriptor::Malformed(e.to_string()))
    })
}

struct SocketConnection {
    service: String,
    reader: tokio::sync::Mutex<FrameReader>,
    writer: Mutex<Option<WriterHandle>>,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
    closed: watch::Sender<bool>,
}

impl SocketConnection {
    fn new(
        service: &ServiceIdentifier,
        reader: BoxedReader,
        writer: BoxedWriter,
        config: &SocketConfig,
    ) -> Self {
        let (writer, writer_task) = spawn_writer_task(writer, config.channel_capacity);
        let (closed, _) = watch::channel(false);

        Self {
            service: service.to_string(),
            reader: tokio::sync::Mutex::new(FrameReader::new(reader, config.max_payload_size)),
            writer: Mutex::new(Some(writer)),
            writer_task: Mutex::new(Some(writer_task)),
            closed,
        }
    }
}

impl Connection for SocketConnection {
    fn receive(&self) -> BoxFuture<'_, Option<Notification>> {
        Box::pin(async move {
            let mut closed = self.closed.subscribe();
            if *closed.borrow() {
                return None;
            }

            let mut reader = self.reader.lock().await;
            tokio::select! {
                biased;
                _ = closed.wait_for(|c| *c) => None,
                next = reader.next() => next,
            }
        })
    }

    fn send(&self, message: Value) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let writer = lock(&self.writer).clone().ok_or(IpcError::ConnectionClosed)?;
            let payload = MsgPackCodec::encode(&message)?;
            writer.send(OutboundFrame::new(kind::MESSAGE, payload)).await
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.send_replace(true);

            // Dropping the last handle lets the writer flush and shut down.
            drop(lock(&self.writer).take());
            let task = lock(&self.writer_task).take();

            if let Some(mut task) = task {
                match tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut task).await {
                    Ok(Ok(Err(e))) => {
                        tracing::debug!(service = %self.service, error = %e, "Writer ended with error")
                    }
                    Ok(_) => {}
                    Err(_) => {
                        tracing::warn!(service = %self.service, "Writer did not flush in time");
                        task.abort();
                    }
                }
            }

            tracing::debug!(service = %self.service, "Socket closed");
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;

    fn id(name: &str) -> ServiceIdentifier {
        ServiceIdentifier::parse(name).unwrap()
    }

    fn reader_over(bytes: Vec<u8>) -> FrameReader {
        FrameReader::new(Box::new(std::io::Cursor::new(bytes)), DEFAULT_MAX_PAYLOAD_SIZE)
    }

    #[cfg(unix)]
    #[test]
    fn test_endpoint_path() {
        let transport = SocketTransport::new("/run/ipcwire");
        assert_eq!(
            transport.endpoint_path(&id("svc.example")),
            PathBuf::from("/run/ipcwire/svc.example.sock")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_rejects_long_paths() {
        let transport = SocketTransport::new("/tmp");
        assert!(transport.validate(&id("svc.example")).is_ok());

        let long = "a".repeat(MAX_SOCKET_PATH_LEN);
        let result = transport.validate(&id(&long));
        assert!(matches!(result, Err(IpcError::InvalidIdentifier(_))));
    }

    #[tokio::test]
    async fn test_open_missing_socket_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SocketTransport::new(dir.path());

        let result = transport.open(&id("svc.missing")).await;
        assert!(matches!(result, Err(IpcError::TransportUnavailable(_))));
    }

    #[tokio::test]
    async fn test_reader_delivers_frames_before_bad_header() {
        let mut bytes = build_frame(
            kind::EVENT,
            &MsgPackCodec::encode(&Value::from("ok")).unwrap(),
        );
        bytes.extend_from_slice(&[0x7f, 0, 0, 0, 0, 0]);

        let mut reader = reader_over(bytes);
        assert_eq!(
            reader.next().await,
            Some(Notification::Event(Value::from("ok")))
        );
        assert!(matches!(
            reader.next().await,
            Some(Notification::Error(ErrorDescriptor::Malformed(_)))
        ));
        assert_eq!(reader.next().await, None);
    }

    #[tokio::test]
    async fn test_reader_decodes_events_and_errors() {
        let mut bytes = build_frame(
            kind::EVENT,
            &MsgPackCodec::encode(&Value::from("ping")).unwrap(),
        );
        bytes.extend(build_frame(
            kind::ERROR,
            &MsgPackCodec::encode(&ErrorDescriptor::ConnectionInterrupted).unwrap(),
        ));

        let mut reader = reader_over(bytes);
        assert_eq!(
            reader.next().await,
            Some(Notification::Event(Value::from("ping")))
        );
        assert_eq!(
            reader.next().await,
            Some(Notification::Error(ErrorDescriptor::ConnectionInterrupted))
        );
        assert_eq!(reader.next().await, None);
    }

    #[tokio::test]
    async fn test_reader_reports_undecodable_payload_and_continues() {
        let mut bytes = build_frame(kind::EVENT, b"\xc1");
        bytes.extend(build_frame(
            kind::EVENT,
            &MsgPackCodec::encode(&Value::from(7)).unwrap(),
        ));

        let mut reader = reader_over(bytes);
        assert!(matches!(
            reader.next().await,
            Some(Notification::Error(ErrorDescriptor::Malformed(_)))
        ));
        assert_eq!(
            reader.next().await,
            Some(Notification::Event(Value::from(7)))
        );
    }

    #[tokio::test]
    async fn test_reader_rejects_message_frames_from_service() {
        let bytes = build_frame(
            kind::MESSAGE,
            &MsgPackCodec::encode(&Value::from(1)).unwrap(),
        );

        let mut reader = reader_over(bytes);
        assert!(matches!(
            reader.next().await,
            Some(Notification::Error(ErrorDescriptor::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_reader_ends_stream_on_bad_header() {
        let mut reader = reader_over(vec![0x7f, 0, 0, 0, 0, 0]);
        assert!(matches!(
            reader.next().await,
            Some(Notification::Error(ErrorDescriptor::Malformed(_)))
        ));
        assert_eq!(reader.next().await, None);
    }

    #[tokio::test]
    async fn test_reader_truncated_frame_is_interruption() {
        let bytes = build_frame(kind::EVENT, b"abcdef");
        let mut reader = reader_over(bytes[..4].to_vec());

        assert_eq!(
            reader.next().await,
            Some(Notification::Error(ErrorDescriptor::ConnectionInterrupted))
        );
        assert_eq!(reader.next().await, None);
    }
}
