//! NDT7 test sessions
//!
//! A session owns one WebSocket connection for one direction and moves
//! through `Idle → Connecting → Open → Closing → Closed`. Errors before
//! `Open` are returned from `start()`; once the connection is open every
//! outcome, including failures, is reported through `on_finish`, which is
//! invoked exactly once and always after the last progress snapshot.
//!
//! Session counters live on the task that drives the connection. Callbacks
//! run synchronously on that task, so they must return quickly and must not
//! block on the session they are observing.

pub mod download;
pub mod flow;
pub mod upload;

pub use download::DownloadSession;
pub use flow::{FlowConfig, FlowController, FlowDecision};
pub use upload::UploadSession;

use crate::error::{Result, SpeedTestError};
use crate::logging::ProtocolLogger;
use crate::models::{Config, MeasurementProgress, SpeedTestMeasurement, TestDirection};
use crate::transport::{CloseCode, Connection, Connector, Transport, TransportConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use url::Url;

pub type ProgressHandler = Arc<dyn Fn(MeasurementProgress) + Send + Sync>;
pub type MeasurementHandler = Arc<dyn Fn(SpeedTestMeasurement) + Send + Sync>;
pub type FinishHandler = Arc<dyn Fn(MeasurementProgress, Option<SpeedTestError>) + Send + Sync>;

/// Caller-facing event handlers of a session
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    pub on_progress: Option<ProgressHandler>,
    pub on_measurement: Option<MeasurementHandler>,
    pub on_finish: Option<FinishHandler>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(MeasurementProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(handler));
        self
    }

    pub fn on_measurement<F>(mut self, handler: F) -> Self
    where
        F: Fn(SpeedTestMeasurement) + Send + Sync + 'static,
    {
        self.on_measurement = Some(Arc::new(handler));
        self
    }

    pub fn on_finish<F>(mut self, handler: F) -> Self
    where
        F: Fn(MeasurementProgress, Option<SpeedTestError>) + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_measurement", &self.on_measurement.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

/// Timing and sizing parameters shared by both session kinds
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub transport: TransportConfig,
    pub flow: FlowConfig,
    /// How long the upload keeps sending after `Open`
    pub measurement_duration: Duration,
    pub report_interval: Duration,
    /// Wait for the peer's close frame after a client-initiated close
    pub close_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transport: TransportConfig::new(config.max_message_size, config.min_message_size)
                .with_device_name(config.device_name.clone()),
            flow: FlowConfig::from_config(config),
            measurement_duration: config.measurement_duration(),
            report_interval: config.report_interval(),
            close_timeout: config.close_timeout(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    /// Terminal. `code` is `None` when the connection never opened.
    Closed {
        code: Option<CloseCode>,
        error: Option<SpeedTestError>,
    },
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed { .. })
    }
}

/// Shared handle for observing and stopping a session from another task
#[derive(Clone)]
pub struct SessionControl {
    inner: Arc<ControlInner>,
}

struct ControlInner {
    stop_requested: AtomicBool,
    notify: Notify,
    state: Mutex<SessionState>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                stop_requested: AtomicBool::new(false),
                notify: Notify::new(),
                state: Mutex::new(SessionState::Idle),
            }),
        }
    }

    /// Request a cooperative stop. The session closes with `GoingAway`; an
    /// upload notices the request at its next flow-control iteration.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.stop_requested.load(Ordering::Acquire)
    }

    /// Resolves once [`stop`](Self::stop) has been called
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a close code and handshake outcome to the error reported by `on_finish`
pub fn classify_close(code: CloseCode, handshake: &std::result::Result<(), String>) -> Option<SpeedTestError> {
    match handshake {
        Err(e) => Some(SpeedTestError::WebsocketCloseWithError(e.clone())),
        Ok(()) if code == CloseCode::NormalClosure => None,
        Ok(()) => Some(SpeedTestError::WebsocketCloseFailed(code)),
    }
}

/// Perform the upgrade, moving the session to `Open` or to `Closed` on failure
pub(crate) async fn open_connection(
    connector: &dyn Connector,
    url: &Url,
    settings: &SessionSettings,
    control: &SessionControl,
    logger: &ProtocolLogger,
    direction: TestDirection,
) -> Result<Connection> {
    control.set_state(SessionState::Connecting);
    logger.log_connecting(direction, url.as_str()).await;

    match connector.connect(url, &settings.transport).await {
        Ok(connection) => {
            control.set_state(SessionState::Open);
            logger.log_connected(direction, url.as_str()).await;
            Ok(connection)
        }
        Err(error) => {
            logger.log_connect_failure(direction, url.as_str(), &error).await;
            control.set_state(SessionState::Closed {
                code: None,
                error: Some(error.clone()),
            });
            Err(error)
        }
    }
}

/// Start a client-initiated close and return the deadline for the peer's reply
pub(crate) async fn begin_close(
    transport: &dyn Transport,
    code: CloseCode,
    settings: &SessionSettings,
    control: &SessionControl,
    logger: &ProtocolLogger,
    direction: TestDirection,
) -> Instant {
    control.set_state(SessionState::Closing);
    if let Err(error) = transport.close(code).await {
        // The reader still reports the terminal close event
        logger.log_close_request_failure(direction, code, &error).await;
    }
    Instant::now() + settings.close_timeout
}

/// Everything needed to conclude a session once the connection is gone
pub(crate) struct Conclusion {
    pub direction: TestDirection,
    pub progress: MeasurementProgress,
    pub code: CloseCode,
    pub handshake: std::result::Result<(), String>,
    pub session_error: Option<SpeedTestError>,
}

/// Classify the close, release the I/O workers and deliver `on_finish`
pub(crate) async fn conclude(
    transport: &dyn Transport,
    control: &SessionControl,
    callbacks: &SessionCallbacks,
    logger: &ProtocolLogger,
    conclusion: Conclusion,
) {
    let Conclusion {
        direction,
        progress,
        code,
        handshake,
        session_error,
    } = conclusion;

    let mut error = session_error.or_else(|| classify_close(code, &handshake));
    if let Err(shutdown_error) = transport.shutdown().await {
        error.get_or_insert(shutdown_error);
    }

    logger
        .log_session_closed(direction, code, progress.num_bytes(), error.as_ref())
        .await;
    control.set_state(SessionState::Closed {
        code: Some(code),
        error: error.clone(),
    });

    if let Some(on_finish) = callbacks.on_finish.as_ref() {
        on_finish(progress, error);
    }
}
