#![forbid(unsafe_code)]

use crate::error::ClientError;
use crate::retry::ReconnectPolicy;
use simtree_core::ids::{NodeId, TreeId};
use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tungstenite::client::IntoClientRequest;
use tungstenite::{Message, WebSocket};

/// Which live stream a subscription follows.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StreamKey {
    Tree(TreeId),
    Node(TreeId, NodeId),
}

impl StreamKey {
    pub fn tree(&self) -> &TreeId {
        match self {
            Self::Tree(tree) | Self::Node(tree, _) => tree,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::Tree(tree) => format!("/simtree/{tree}/events"),
            Self::Node(tree, node) => format!("/simtree/{tree}/sim/{node}/events"),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// What one poll drained from a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollBatch {
    pub messages: Vec<String>,
    /// The peer closed or the connection failed; nothing more will arrive on it.
    pub closed: bool,
}

pub trait StreamConnection {
    /// Returns up to `budget` text messages that are available now. Never blocks longer than
    /// the connection's poll timeout per read.
    fn poll(&mut self, budget: usize) -> PollBatch;
    fn close(&mut self);
}

pub trait StreamConnector {
    type Connection: StreamConnection;

    /// Connects and completes the readiness handshake.
    fn open(&self, key: &StreamKey) -> Result<Self::Connection, ClientError>;
}

/// Plain `ws://` connector. Each connection sends the readiness token right after the
/// handshake; the server starts pushing once it has seen it.
#[derive(Clone, Debug)]
pub struct WsConnector {
    ws_base: String,
    ready_token: String,
    connect_timeout: Duration,
    poll_timeout: Duration,
}

impl WsConnector {
    pub fn new(ws_base: &str, ready_token: &str) -> Self {
        Self {
            ws_base: ws_base.trim_end_matches('/').to_string(),
            ready_token: ready_token.to_string(),
            connect_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(20),
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, poll_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self.poll_timeout = poll_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn url_for(&self, key: &StreamKey) -> String {
        format!("{}{}", self.ws_base, key.path())
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ClientError> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or(ClientError::InvalidInput("stream host did not resolve"))
}

impl StreamConnector for WsConnector {
    type Connection = WsConnection;

    fn open(&self, key: &StreamKey) -> Result<WsConnection, ClientError> {
        let url = self.url_for(key);
        let request = url.as_str().into_client_request()?;
        let uri = request.uri();
        if uri.scheme_str() != Some("ws") {
            return Err(ClientError::InvalidInput("only ws:// stream urls are supported"));
        }
        let host = uri
            .host()
            .ok_or(ClientError::InvalidInput("stream url has no host"))?;
        let addr = resolve(host, uri.port_u16().unwrap_or(80))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;
        let _ = stream.set_nodelay(true);

        let (mut socket, _response) = tungstenite::client::client(request, stream)
            .map_err(|err| ClientError::Handshake(err.to_string()))?;
        socket.send(Message::text(self.ready_token.clone()))?;
        socket.get_mut().set_read_timeout(Some(self.poll_timeout))?;

        tracing::info!(%url, "stream open");
        Ok(WsConnection {
            socket,
            url,
            closed: false,
        })
    }
}

pub struct WsConnection {
    socket: WebSocket<TcpStream>,
    url: String,
    closed: bool,
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(io) if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
    )
}

impl StreamConnection for WsConnection {
    fn poll(&mut self, budget: usize) -> PollBatch {
        let mut batch = PollBatch::default();
        if self.closed {
            batch.closed = true;
            return batch;
        }
        while batch.messages.len() < budget {
            match self.socket.read() {
                Ok(Message::Text(text)) => batch.messages.push(text.as_str().to_string()),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => batch.messages.push(text),
                    Err(_) => tracing::debug!(url = %self.url, "dropping non-utf8 binary frame"),
                },
                Ok(Message::Close(_)) => {
                    tracing::info!(url = %self.url, "stream closed by peer");
                    self.closed = true;
                    break;
                }
                Ok(_) => {}
                Err(err) if is_timeout(&err) => break,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    self.closed = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(url = %self.url, error = %err, "stream read failed");
                    self.closed = true;
                    break;
                }
            }
        }
        batch.closed = self.closed;
        batch
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
        tracing::info!(url = %self.url, "stream closed");
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Result of one [`Subscription::maintain`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum Reconnect {
    /// Live, or nothing to follow.
    Idle,
    /// Dropped; the next attempt is scheduled.
    Waiting,
    Reconnected,
    /// Dropped and the policy allows no further attempts.
    GaveUp,
}

/// One owned stream of a given kind. Opening a new key closes the previous connection first,
/// so there is never more than one live connection per subscription.
pub struct Subscription<Conn> {
    key: Option<StreamKey>,
    conn: Option<Conn>,
    attempts: u32,
    retry_at: Option<Instant>,
    gave_up: bool,
}

impl<Conn> Default for Subscription<Conn> {
    fn default() -> Self {
        Self {
            key: None,
            conn: None,
            attempts: 0,
            retry_at: None,
            gave_up: false,
        }
    }
}

impl<Conn: StreamConnection> Subscription<Conn> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> Option<&StreamKey> {
        self.key.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.conn.is_some()
    }

    /// Follows `key`. On a connect failure the key is kept so a reconnect policy can retry it.
    pub fn open<K>(&mut self, connector: &K, key: StreamKey) -> Result<(), ClientError>
    where
        K: StreamConnector<Connection = Conn>,
    {
        self.close();
        self.key = Some(key.clone());
        let conn = connector.open(&key)?;
        self.conn = Some(conn);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.key = None;
        self.attempts = 0;
        self.retry_at = None;
        self.gave_up = false;
    }

    /// Drains what is available. A connection that reports `closed` is dropped; the key stays.
    pub fn poll(&mut self, budget: usize) -> PollBatch {
        let Some(conn) = self.conn.as_mut() else {
            return PollBatch::default();
        };
        let batch = conn.poll(budget);
        if batch.closed {
            if let Some(mut conn) = self.conn.take() {
                conn.close();
            }
            if let Some(key) = &self.key {
                tracing::warn!(stream = %key, "stream dropped");
            }
        }
        batch
    }

    /// Re-opens a dropped stream according to `policy`.
    pub fn maintain<K>(&mut self, connector: &K, policy: &ReconnectPolicy, now: Instant) -> Reconnect
    where
        K: StreamConnector<Connection = Conn>,
    {
        if self.conn.is_some() {
            return Reconnect::Idle;
        }
        let Some(key) = self.key.clone() else {
            return Reconnect::Idle;
        };
        if self.gave_up {
            return Reconnect::GaveUp;
        }
        let due = match self.retry_at {
            Some(at) => at,
            None => match policy.delay_for(self.attempts) {
                Some(delay) => {
                    let at = now + delay;
                    self.retry_at = Some(at);
                    at
                }
                None => {
                    tracing::warn!(stream = %key, attempts = self.attempts, "giving up on stream");
                    self.gave_up = true;
                    return Reconnect::GaveUp;
                }
            },
        };
        if now < due {
            return Reconnect::Waiting;
        }

        self.retry_at = None;
        match connector.open(&key) {
            Ok(conn) => {
                tracing::info!(stream = %key, attempts = self.attempts, "stream reconnected");
                self.conn = Some(conn);
                self.attempts = 0;
                Reconnect::Reconnected
            }
            Err(err) => {
                self.attempts += 1;
                tracing::warn!(stream = %key, attempts = self.attempts, error = %err, "reconnect failed");
                Reconnect::Waiting
            }
        }
    }
}
