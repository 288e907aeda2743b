//! Connection management (§4.6): dialing, reconnect-with-backoff, and
//! STAN-correlated request/response dispatch over one TCP connection.

mod backoff;
mod pending;

pub use pending::PendingTable;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec::{self, Message};
use crate::error::{Error, Result};
use crate::framing::{FrameCodec, HeaderStyle, NapsTag};
use crate::metrics::NetworkingStats;
use crate::spec::MessageSpec;

/// Connection lifecycle state: `New -> Connecting -> Online <-> Reconnecting
/// -> (Online|Failed) -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Online,
    Reconnecting,
    Failed,
    Closed,
}

/// Static dial parameters for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub header_style: HeaderStyle,
    pub naps: Option<NapsTag>,
    pub connect_timeout: Duration,
    pub total_connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub response_timeout: Duration,
}

struct Shared {
    params: ConnectParams,
    spec: Arc<MessageSpec>,
    state: AsyncMutex<ConnectionState>,
    writer: AsyncMutex<Option<WriteHalf<TcpStream>>>,
    pending: PendingTable,
    stats: Arc<NetworkingStats>,
    reconnecting: AtomicBool,
}

/// Owns one TCP connection to an ISO 8583 host: framing, reconnect, and
/// STAN-correlated dispatch.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    reader_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(params: ConnectParams, spec: Arc<MessageSpec>, stats: Arc<NetworkingStats>) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                params,
                spec,
                state: AsyncMutex::new(ConnectionState::New),
                writer: AsyncMutex::new(None),
                pending: PendingTable::new(),
                stats,
                reconnecting: AtomicBool::new(false),
            }),
            reader_task: AsyncMutex::new(None),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.lock().await
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.state().await, ConnectionState::Online)
    }

    pub fn stats(&self) -> &NetworkingStats {
        &self.shared.stats
    }

    /// Dial the configured host, retrying with exponential backoff until
    /// `max_reconnect_attempts + 1` attempts or `total_connect_timeout` is
    /// exhausted (§4.6: "Attempt TCP connect up to `reconnectAttempts + 1`
    /// times").
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        *self.shared.state.lock().await = ConnectionState::Connecting;
        let start = Instant::now();
        let addr = format!("{}:{}", self.shared.params.host, self.shared.params.port);

        let mut attempts_made = 0;
        for attempt in 1..=self.shared.params.max_reconnect_attempts + 1 {
            if start.elapsed() >= self.shared.params.total_connect_timeout {
                break;
            }
            attempts_made = attempt;
            self.shared.stats.record_reconnect_attempt();

            match timeout(self.shared.params.connect_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    let (read_half, write_half) = tokio::io::split(stream);
                    *self.shared.writer.lock().await = Some(write_half);
                    let task = tokio::spawn(Self::run_reader(Arc::clone(self), read_half));
                    *self.reader_task.lock().await = Some(task);
                    *self.shared.state.lock().await = ConnectionState::Online;
                    self.shared.stats.record_reconnect_success(start.elapsed());
                    info!(host = %self.shared.params.host, port = self.shared.params.port, attempt, "connected");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "connect attempt failed");
                    self.shared.stats.record_error(true);
                }
                Err(_) => {
                    warn!(attempt, "connect attempt timed out");
                    self.shared.stats.record_error(true);
                }
            }

            let delay = backoff::delay_for_attempt(attempt);
            self.shared.stats.record_backoff(delay);
            tokio::time::sleep(delay).await;
        }

        self.shared.stats.record_reconnect_failure();
        *self.shared.state.lock().await = ConnectionState::Failed;
        Err(Error::ConnectFailed {
            attempts: attempts_made,
            message: format!("could not connect to {addr}"),
        })
    }

    async fn run_reader(self: Arc<Self>, mut read_half: ReadHalf<TcpStream>) {
        let frame_codec = FrameCodec::new(self.shared.params.header_style, self.shared.params.naps);
        loop {
            match frame_codec.read_frame(&mut read_half).await {
                Ok(raw) => match codec::unpack(&raw, &self.shared.spec) {
                    Ok(msg) => match msg.get_str(11) {
                        Some(stan) => self.shared.pending.complete(stan, msg),
                        None => debug!("inbound message has no STAN; dropping"),
                    },
                    Err(e) => warn!(error = %e, "failed to unpack inbound frame"),
                },
                Err(e) => {
                    error!(error = %e, "connection reader failed; scheduling reconnect");
                    self.shared.stats.record_error(e.is_retriable());
                    *self.shared.state.lock().await = ConnectionState::Reconnecting;
                    self.spawn_reconnect();
                    return;
                }
            }
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self
            .shared
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return; // a reconnect is already in flight
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.connect().await;
            this.shared.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    /// Send `msg` and wait for the reply correlated by its STAN, using the
    /// connection's configured response timeout.
    pub async fn send(self: &Arc<Self>, msg: &Message) -> Result<Message> {
        self.send_async(msg, self.shared.params.response_timeout).await
    }

    /// Send `msg` and wait up to `response_timeout` for the correlated reply.
    pub async fn send_async(self: &Arc<Self>, msg: &Message, response_timeout: Duration) -> Result<Message> {
        if !self.is_connected().await {
            return Err(Error::ConnectionClosed);
        }
        let stan = msg
            .get_str(11)
            .ok_or_else(|| Error::unpack("outbound message has no STAN (field 11)", &[]))?
            .to_string();

        let rx = self.shared.pending.register(&stan)?;
        if let Err(e) = self.write_frame(msg).await {
            self.shared.pending.cancel(&stan);
            return Err(e);
        }

        match timeout(response_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.shared.pending.cancel(&stan);
                self.shared.stats.record_error(true);
                Err(Error::ResponseTimeout(response_timeout))
            }
        }
    }

    /// Send `msg` without registering it for, or waiting on, a reply.
    pub async fn background_send(self: &Arc<Self>, msg: &Message) -> Result<()> {
        if !self.is_connected().await {
            return Err(Error::ConnectionClosed);
        }
        self.write_frame(msg).await
    }

    /// Probe liveness by sending a prebuilt request and checking whether a
    /// correlated reply arrives within `timeout_dur`.
    pub async fn health_check(self: &Arc<Self>, probe: &Message, timeout_dur: Duration) -> bool {
        let ok = self.send_async(probe, timeout_dur).await.is_ok();
        self.shared.stats.record_health_check(ok);
        ok
    }

    async fn write_frame(&self, msg: &Message) -> Result<()> {
        let raw = codec::pack(msg, &self.shared.spec)?;
        let frame_codec = FrameCodec::new(self.shared.params.header_style, self.shared.params.naps);
        let mut writer_guard = self.shared.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(Error::ConnectionClosed)?;
        frame_codec.write_frame(writer, &raw).await
    }

    /// Close the connection: delete every pending entry (closing its
    /// channel), stop the reader task, then drop the socket (§4.6).
    pub async fn close(self: &Arc<Self>) -> Result<()> {
        *self.shared.state.lock().await = ConnectionState::Closed;
        self.shared.pending.clear();
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        *self.shared.writer.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_spec() -> Arc<MessageSpec> {
        let json = r#"{
            "name": "test",
            "fields": {
                "0": {"type": "numeric", "length": 4, "enc": "ASCII", "prefix": "fixed"},
                "1": {"type": "bitmap", "length": 8, "enc": "BINARY", "prefix": "fixed"},
                "11": {"type": "numeric", "length": 6, "enc": "ASCII", "prefix": "fixed"}
            }
        }"#;
        Arc::new(MessageSpec::from_json_str(json).unwrap())
    }

    fn test_params(host: String, port: u16) -> ConnectParams {
        ConnectParams {
            host,
            port,
            header_style: HeaderStyle::Ascii4,
            naps: None,
            connect_timeout: Duration::from_millis(200),
            total_connect_timeout: Duration::from_millis(600),
            max_reconnect_attempts: 2,
            response_timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn connect_fails_after_exhausting_attempts() {
        // Nothing listens on this port.
        let spec = test_spec();
        let stats = Arc::new(NetworkingStats::new());
        let conn = ConnectionManager::new(test_params("127.0.0.1".into(), 1), spec, stats);
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert_eq!(conn.state().await, ConnectionState::Failed);
    }

    #[tokio::test]
    async fn send_async_roundtrips_through_an_echo_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 4];
            socket.read_exact(&mut header).await.unwrap();
            let len: usize = std::str::from_utf8(&header).unwrap().parse().unwrap();
            let mut body = vec![0u8; len];
            socket.read_exact(&mut body).await.unwrap();

            // Echo back as MTI 0810 with the same fields.
            let mut reply = body;
            reply[0..4].copy_from_slice(b"0810");
            let reply_header = format!("{:04}", reply.len());
            socket.write_all(reply_header.as_bytes()).await.unwrap();
            socket.write_all(&reply).await.unwrap();
        });

        let spec = test_spec();
        let stats = Arc::new(NetworkingStats::new());
        let conn = ConnectionManager::new(test_params("127.0.0.1".into(), port), spec.clone(), stats);
        conn.connect().await.unwrap();

        let mut msg = Message::new("0800");
        msg.set(11, "000001");
        let reply = conn.send(&msg).await.unwrap();
        assert_eq!(reply.mti, "0810");
        assert_eq!(reply.get_str(11), Some("000001"));

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_async_times_out_when_no_reply_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Accept the connection but never reply.
            std::mem::forget(socket);
        });

        let spec = test_spec();
        let stats = Arc::new(NetworkingStats::new());
        let mut params = test_params("127.0.0.1".into(), port);
        params.response_timeout = Duration::from_millis(50);
        let conn = ConnectionManager::new(params, spec, stats);
        conn.connect().await.unwrap();

        let mut msg = Message::new("0800");
        msg.set(11, "000002");
        let err = conn.send(&msg).await.unwrap_err();
        assert!(matches!(err, Error::ResponseTimeout(_)));
    }

    #[tokio::test]
    async fn close_empties_the_pending_table_and_unblocks_in_flight_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Accept the connection but never reply, so the in-flight send
            // below is still pending when we close.
            std::mem::forget(socket);
        });

        let spec = test_spec();
        let stats = Arc::new(NetworkingStats::new());
        let mut params = test_params("127.0.0.1".into(), port);
        params.response_timeout = Duration::from_secs(5);
        let conn = ConnectionManager::new(params, spec, stats);
        conn.connect().await.unwrap();

        let mut msg = Message::new("0800");
        msg.set(11, "000099");
        let conn_for_send = Arc::clone(&conn);
        let send_task = tokio::spawn(async move { conn_for_send.send(&msg).await });

        // Give the send a moment to register its pending entry, then close
        // the connection out from under it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(conn.shared.pending.len(), 1);
        conn.close().await.unwrap();
        assert!(conn.shared.pending.is_empty());

        let result = timeout(Duration::from_millis(200), send_task).await.unwrap().unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_before_connecting_is_connection_closed() {
        let spec = test_spec();
        let stats = Arc::new(NetworkingStats::new());
        let conn = ConnectionManager::new(test_params("127.0.0.1".into(), 1), spec, stats);
        let mut msg = Message::new("0800");
        msg.set(11, "000003");
        let err = conn.send(&msg).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }
}
