//! One request/response exchange at a time over a short-lived TCP connection.
//!
//! Every exchange opens a fresh connection, writes one frame, reads lines
//! until the reply carrying the same sequence number shows up, and closes the
//! connection again. Embedded devices do not cope well with idle connections,
//! so nothing is kept open between exchanges.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::protocol;
use crate::protocol::Command;
use crate::protocol::CommandError;
use crate::protocol::Request;
use crate::protocol::Response;
use crate::protocol::SequenceSource;

/// Opens connections to a device.
///
/// This trait allows for swapping the TCP connection out in tests.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Open a new connection to the device
    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Address used in log messages
    fn peer(&self) -> &str;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn peer(&self) -> &str {
        &self.addr
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {peer}: {source}")]
    Connect {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no matching response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed by peer")]
    Closed,

    #[error("invalid command: {0}")]
    Command(#[from] CommandError),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    /// Socket-level failures: refused, reset, closed by the peer.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { .. } | TransportError::Io(_) | TransportError::Closed
        )
    }
}

/// Serialized request/response exchanges with one device.
pub struct Session<C: Connector = TcpConnector> {
    connector: C,
    // Held for the whole exchange.
    sequence: Mutex<SequenceSource>,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            sequence: Mutex::new(SequenceSource::new()),
        }
    }

    pub fn peer(&self) -> &str {
        self.connector.peer()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Send a request and wait for the response carrying its sequence number.
    ///
    /// Concurrent callers queue on the session lock, so at most one request is
    /// in flight. The timeout covers the whole exchange (connect, write and
    /// every read) and starts once the lock is held. The connection only lives
    /// inside the exchange, so it is closed when the exchange ends or when the
    /// returned future is dropped.
    pub async fn send_and_await(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let mut sequence = self.sequence.lock().await;
        let deadline = Instant::now() + timeout;
        let command = Command::new(sequence.next(), request)?;

        self.exchange(&command, deadline, timeout).await
    }

    async fn exchange(
        &self,
        command: &Command,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let frame = command.encode()?;
        let elapsed = || TransportError::Timeout(timeout);
        let peer = self.connector.peer();

        let stream = timeout_at(deadline, self.connector.connect())
            .await
            .map_err(|_| elapsed())?
            .map_err(|source| TransportError::Connect {
                peer: peer.to_string(),
                source,
            })?;
        debug!("Connected to {}", peer);
        let mut conn = BufReader::new(stream);

        debug!(
            "Sending to {}: {}",
            peer,
            String::from_utf8_lossy(&frame).trim_end()
        );
        timeout_at(deadline, async {
            conn.write_all(&frame).await?;
            conn.flush().await?;
            Ok::<_, io::Error>(())
        })
        .await
        .map_err(|_| elapsed())??;

        let mut line = Vec::new();
        let result = loop {
            line.clear();
            let read = match timeout_at(deadline, conn.read_until(b'\n', &mut line)).await {
                Ok(Ok(read)) => read,
                Ok(Err(e)) => break Err(e.into()),
                Err(_) => {
                    warn!(
                        "Timeout waiting for response with sn {} from {}",
                        command.sn(),
                        peer
                    );
                    break Err(elapsed());
                }
            };

            if read == 0 {
                debug!("Connection closed by {} while waiting for response", peer);
                break Err(TransportError::Closed);
            }

            match protocol::decode(&line) {
                Ok(response) if response.sn == command.sn() => {
                    debug!("Received from {}: {:?}", peer, response);
                    break Ok(response);
                }
                Ok(response) => {
                    debug!(
                        "Discarding message with mismatched sn {} (waiting for {})",
                        response.sn,
                        command.sn()
                    );
                }
                Err(e) => {
                    warn!(
                        "Error decoding response from {}: {} - Data: {:?}",
                        peer,
                        e,
                        String::from_utf8_lossy(&line)
                    );
                }
            }
        };

        drop(conn);
        debug!("Disconnected from {}", peer);
        result
    }
}

/// In-memory connector for tests.
///
/// Each connection is served by a task that decodes incoming commands, records
/// them, and writes back whatever the reply function returns. The task counts
/// the connection as closed once the client end is gone or it hangs up.
#[cfg(test)]
pub struct MockConnector {
    reply: std::sync::Arc<dyn Fn(&Command) -> Vec<Vec<u8>> + Send + Sync>,
    pub connects: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    pub closed: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    pub received: std::sync::Arc<std::sync::Mutex<Vec<Command>>>,
    refuse: bool,
    hang_up: bool,
    delay: Duration,
}

#[cfg(test)]
impl MockConnector {
    pub fn new(reply: impl Fn(&Command) -> Vec<Vec<u8>> + Send + Sync + 'static) -> Self {
        Self {
            reply: std::sync::Arc::new(reply),
            connects: Default::default(),
            closed: Default::default(),
            received: Default::default(),
            refuse: false,
            hang_up: false,
            delay: Duration::ZERO,
        }
    }

    /// Fail every connection attempt.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(|_| Vec::new())
        }
    }

    /// Close the connection after writing the replies.
    pub fn hanging_up(mut self) -> Self {
        self.hang_up = true;
        self
    }

    /// Wait before writing each batch of replies.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Wait until the server side has seen `count` connections close.
    pub async fn wait_closed(&self, count: usize) {
        while self.closed_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn received(&self) -> Vec<Command> {
        self.received.lock().unwrap().clone()
    }
}

/// Successful reply frame echoing the command's sequence number.
#[cfg(test)]
pub fn ok_reply(command: &Command, msg: serde_json::Value) -> Vec<u8> {
    let msg = match msg {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    };
    Response::new(command.sn(), 0, msg).encode().unwrap()
}

#[cfg(test)]
#[async_trait]
impl Connector for MockConnector {
    type Stream = tokio::io::DuplexStream;

    async fn connect(&self) -> io::Result<tokio::io::DuplexStream> {
        self.connects
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.refuse {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }

        let (client, server) = tokio::io::duplex(4096);
        let reply = self.reply.clone();
        let received = self.received.clone();
        let closed = self.closed.clone();
        let hang_up = self.hang_up;
        let delay = self.delay;

        tokio::spawn(async move {
            let serve = async {
                let mut server = BufReader::new(server);
                let mut line = Vec::new();
                loop {
                    line.clear();
                    match server.read_until(b'\n', &mut line).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                    let Ok(command) = protocol::decode_command(&line) else {
                        continue;
                    };
                    received.lock().unwrap().push(command.clone());
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    for frame in reply(&command) {
                        if server.write_all(&frame).await.is_err() {
                            return;
                        }
                    }
                    if hang_up {
                        return;
                    }
                }
            };
            serve.await;
            closed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        Ok(client)
    }

    fn peer(&self) -> &str {
        "mock"
    }
}
