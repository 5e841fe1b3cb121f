//! tokio-tungstenite implementation of the transport capability
//!
//! Each connection owns two tasks: a reader that turns frames into
//! [`TransportEvent`]s and a writer that drains an outbound queue. Bytes sit
//! in `buffered` from the moment they are queued until the writer has handed
//! the frame to the socket, which is what the upload flow controller reads
//! back as backpressure.
//!
//! When a device name is configured the TCP socket is created with socket2
//! and bound to that interface before the TLS and WebSocket handshakes run
//! over it.

use super::{CloseCode, Connection, Connector, Transport, TransportConfig, TransportEvent};
use crate::error::{Result, SpeedTestError};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{
    client_async_tls_with_config, connect_async_with_config, MaybeTlsStream, WebSocketStream,
};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Grace period for the I/O tasks to finish once shutdown is requested
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

enum Outbound {
    Binary(Vec<u8>),
    Close(CloseCode),
}

/// Connects to NDT7 servers over `ws`/`wss`
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url, config: &TransportConfig) -> Result<Connection> {
        let mut request = url.as_str().into_client_request()?;
        let protocol = HeaderValue::from_str(&config.subprotocol).map_err(|e| {
            SpeedTestError::config(format!("Invalid subprotocol '{}': {}", config.subprotocol, e))
        })?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", protocol);

        // tungstenite never fragments outbound frames, so only the inbound
        // limits need negotiating here.
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_frame_size = Some(config.max_frame_size);
        ws_config.max_message_size = Some(config.max_frame_size);

        let (stream, _response) = match &config.device_name {
            Some(device) => {
                let tcp = connect_on_device(url, device).await?;
                client_async_tls_with_config(request, tcp, Some(ws_config), None).await?
            }
            None => connect_async_with_config(request, Some(ws_config), false).await?,
        };
        let (sink, stream) = stream.split();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        let write_error = Arc::new(Mutex::new(None));

        let reader = tokio::spawn(read_loop(stream, event_tx));
        let writer = tokio::spawn(write_loop(
            sink,
            outbound_rx,
            buffered.clone(),
            write_error.clone(),
        ));

        let transport = WebSocketTransport {
            outbound: Mutex::new(Some(outbound_tx)),
            buffered,
            write_error,
            workers: Mutex::new(vec![reader, writer]),
        };

        Ok(Connection {
            transport: Arc::new(transport),
            events: event_rx,
        })
    }
}

/// Resolve the server and connect over the named interface, trying each
/// resolved address in turn
async fn connect_on_device(url: &Url, device: &str) -> Result<TcpStream> {
    let host = url
        .host_str()
        .ok_or_else(|| SpeedTestError::InvalidTestUrl(format!("no host in '{}'", url)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| SpeedTestError::InvalidTestUrl(format!("no port for '{}'", url)))?;

    let mut last_error = None;
    for addr in tokio::net::lookup_host((host, port)).await? {
        match connect_bound(addr, device).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        SpeedTestError::network(format!("No addresses found for {}", host))
    }))
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
async fn connect_bound(addr: SocketAddr, device: &str) -> Result<TcpStream> {
    use socket2::{Domain, Protocol, Socket, Type};
    use tokio::net::TcpSocket;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket
        .bind_device(Some(device.as_bytes()))
        .map_err(|e| SpeedTestError::network(format!("Cannot bind to device '{}': {}", device, e)))?;

    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpSocket::from_std_stream(std_stream).connect(addr).await?;
    Ok(stream)
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
async fn connect_bound(_addr: SocketAddr, _device: &str) -> Result<TcpStream> {
    Err(SpeedTestError::NotImplemented)
}

struct WebSocketTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    buffered: Arc<AtomicUsize>,
    write_error: Arc<Mutex<Option<String>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketTransport {
    fn enqueue(&self, message: Outbound) -> std::result::Result<(), Outbound> {
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(sender) => sender.send(message).map_err(|e| e.0),
            None => Err(message),
        }
    }

    fn closed_error(&self) -> SpeedTestError {
        let cause = self
            .write_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_else(|| "connection is closed".to_string());
        SpeedTestError::transport(cause)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_binary(&self, payload: Vec<u8>) -> Result<()> {
        let len = payload.len();
        self.buffered.fetch_add(len, Ordering::AcqRel);
        if self.enqueue(Outbound::Binary(payload)).is_err() {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    async fn close(&self, code: CloseCode) -> Result<()> {
        self.enqueue(Outbound::Close(code))
            .map_err(|_| self.closed_error())
    }

    async fn shutdown(&self) -> Result<()> {
        // Dropping the sender lets the writer drain and exit
        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
        let workers: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));

        let mut failure = None;
        for mut worker in workers {
            match tokio::time::timeout(WORKER_SHUTDOWN_GRACE, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failure = Some(format!("I/O worker failed: {}", e)),
                Err(_) => {
                    worker.abort();
                    failure = Some("I/O worker did not stop in time".to_string());
                }
            }
        }

        match failure {
            Some(message) => Err(SpeedTestError::transport(message)),
            None => Ok(()),
        }
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: mpsc::UnboundedSender<TransportEvent>) {
    let mut code = CloseCode::MissingCode;
    let handshake = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let _ = events.send(TransportEvent::Text(text));
            }
            Some(Ok(Message::Binary(payload))) => {
                let _ = events.send(TransportEvent::Binary(payload.len()));
            }
            Some(Ok(Message::Close(frame))) => {
                code = frame
                    .map(|f| CloseCode::from(u16::from(f.code)))
                    .unwrap_or(CloseCode::MissingCode);
            }
            Some(Ok(_)) => {}
            Some(Err(WsError::ConnectionClosed)) | None => break Ok(()),
            Some(Err(e)) => break Err(e.to_string()),
        }
    };

    let _ = events.send(TransportEvent::Closed { code, handshake });
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    buffered: Arc<AtomicUsize>,
    write_error: Arc<Mutex<Option<String>>>,
) {
    while let Some(message) = outbound.recv().await {
        let result = match message {
            Outbound::Binary(payload) => {
                let len = payload.len();
                let result = sink.send(Message::Binary(payload)).await;
                buffered.fetch_sub(len, Ordering::AcqRel);
                result
            }
            Outbound::Close(code) => {
                let frame = CloseFrame {
                    code: WsCloseCode::from(code.as_u16()),
                    reason: "".into(),
                };
                sink.send(Message::Close(Some(frame))).await
            }
        };

        if let Err(e) = result {
            *write_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
            break;
        }
    }
}
