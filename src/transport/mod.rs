//! WebSocket transport capability consumed by test sessions
//!
//! Sessions never touch the socket directly. A [`Connector`] performs the
//! upgrade and hands back a [`Connection`]: a [`Transport`] handle for
//! outbound operations plus an ordered stream of [`TransportEvent`]s. The
//! event stream always ends with exactly one [`TransportEvent::Closed`].

pub mod websocket;

pub use websocket::WebSocketConnector;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Subprotocol announced in `Sec-WebSocket-Protocol`
pub const NDT7_SUBPROTOCOL: &str = "net.measurementlab.ndt.v7";

/// WebSocket close codes the client cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    NormalClosure,
    /// 1001
    GoingAway,
    /// 1008
    PolicyViolation,
    /// 1005, the peer closed without a status code
    MissingCode,
    Other(u16),
}

impl CloseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::NormalClosure => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MissingCode => 1005,
            CloseCode::Other(code) => *code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::NormalClosure,
            1001 => CloseCode::GoingAway,
            1008 => CloseCode::PolicyViolation,
            1005 => CloseCode::MissingCode,
            other => CloseCode::Other(other),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseCode::NormalClosure => "normal closure",
            CloseCode::GoingAway => "going away",
            CloseCode::PolicyViolation => "policy violation",
            CloseCode::MissingCode => "no status code",
            CloseCode::Other(_) => "other",
        };
        write!(f, "{} {}", self.as_u16(), name)
    }
}

/// Upgrade parameters negotiated with the server
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// Largest accepted frame, also used as the largest accepted message
    pub max_frame_size: usize,
    /// Smallest non-final fragment the peer may send
    pub min_non_final_fragment_size: usize,
    /// Value of `Sec-WebSocket-Protocol`
    pub subprotocol: String,
    /// Bind the TCP socket to this interface before connecting
    pub device_name: Option<String>,
}

impl TransportConfig {
    pub fn new(max_frame_size: usize, min_non_final_fragment_size: usize) -> Self {
        Self {
            max_frame_size,
            min_non_final_fragment_size,
            subprotocol: NDT7_SUBPROTOCOL.to_string(),
            device_name: None,
        }
    }

    pub fn with_device_name(mut self, device_name: Option<String>) -> Self {
        self.device_name = device_name;
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(crate::defaults::MAX_MESSAGE_SIZE, crate::defaults::MIN_MESSAGE_SIZE)
    }
}

/// Inbound events, delivered in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame; only the payload length is kept
    Binary(usize),
    /// Terminal event carrying the peer's close code and the outcome of the
    /// close handshake (`Err` when the transport failed while closing)
    Closed {
        code: CloseCode,
        handshake: std::result::Result<(), String>,
    },
}

/// Outbound side of an open connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue a binary frame. Fails once the connection can no longer send.
    async fn send_binary(&self, payload: Vec<u8>) -> Result<()>;

    /// Bytes queued for sending but not yet written to the socket
    fn buffered_amount(&self) -> usize;

    /// Start the close handshake with the given code
    async fn close(&self, code: CloseCode) -> Result<()>;

    /// Release the I/O workers owned by this connection and wait for them
    async fn shutdown(&self) -> Result<()>;
}

/// An open connection
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Performs the WebSocket upgrade
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url, config: &TransportConfig) -> Result<Connection>;
}
