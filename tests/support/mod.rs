//! Scripted in-memory transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ndt7_client::error::{Result, SpeedTestError};
use ndt7_client::models::{Config, MeasurementProgress, SpeedTestMeasurement};
use ndt7_client::session::{SessionCallbacks, SessionSettings};
use ndt7_client::transport::{CloseCode, Connection, Connector, Transport, TransportConfig, TransportEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

pub const SERVER_MEASUREMENT: &str =
    r#"{"AppInfo":{"ElapsedTime":250000,"NumBytes":65536},"Origin":"server","Test":"download"}"#;

/// One scripted action of the simulated server
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Binary(usize),
    Wait(Duration),
    /// Server-initiated close with a clean handshake
    Close(CloseCode),
    /// Connection dropped while closing
    Abort(String),
}

#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Simulated time spent in each `send_binary`
    pub send_delay: Duration,
    /// Constant value reported by `buffered_amount`
    pub buffered: usize,
    /// Whether the server answers a client close with the same code
    pub echo_close: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_millis(1),
            buffered: 0,
            echo_close: true,
        }
    }
}

pub struct MockTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    options: ScriptOptions,
    closed: AtomicBool,
    sends: Mutex<Vec<(usize, Instant)>>,
    closes: Mutex<Vec<CloseCode>>,
    shutdowns: AtomicUsize,
}

impl MockTransport {
    fn new(events: mpsc::UnboundedSender<TransportEvent>, options: ScriptOptions) -> Self {
        Self {
            events,
            options,
            closed: AtomicBool::new(false),
            sends: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn sent_sizes(&self) -> Vec<usize> {
        self.sends.lock().unwrap().iter().map(|(size, _)| *size).collect()
    }

    pub fn send_times(&self) -> Vec<Instant> {
        self.sends.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub fn close_codes(&self) -> Vec<CloseCode> {
        self.closes.lock().unwrap().clone()
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn deliver(&self, event: TransportEvent) {
        if !self.is_closed() {
            let _ = self.events.send(event);
        }
    }

    fn finish(&self, code: CloseCode, handshake: std::result::Result<(), String>) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Closed { code, handshake });
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_binary(&self, payload: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(SpeedTestError::transport("connection is closed"));
        }
        self.sends.lock().unwrap().push((payload.len(), Instant::now()));
        if !self.options.send_delay.is_zero() {
            tokio::time::sleep(self.options.send_delay).await;
        }
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.options.buffered
    }

    async fn close(&self, code: CloseCode) -> Result<()> {
        if self.is_closed() {
            return Err(SpeedTestError::transport("connection is closed"));
        }
        self.closes.lock().unwrap().push(code);
        if self.options.echo_close {
            self.finish(code, Ok(()));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn play(script: Vec<Step>, transport: Arc<MockTransport>) {
    for step in script {
        if transport.is_closed() {
            return;
        }
        match step {
            Step::Text(text) => transport.deliver(TransportEvent::Text(text)),
            Step::Binary(len) => transport.deliver(TransportEvent::Binary(len)),
            Step::Wait(duration) => tokio::time::sleep(duration).await,
            Step::Close(code) => transport.finish(code, Ok(())),
            Step::Abort(reason) => transport.finish(CloseCode::MissingCode, Err(reason)),
        }
    }
}

/// Connector that plays one script per connection, in order
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    options: ScriptOptions,
    fail_with: Option<SpeedTestError>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    urls: Mutex<Vec<Url>>,
    configs: Mutex<Vec<TransportConfig>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            options: ScriptOptions::default(),
            fail_with: None,
            transports: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: SpeedTestError) -> Self {
        let mut connector = Self::new(Vec::new());
        connector.fail_with = Some(error);
        connector
    }

    pub fn with_options(mut self, options: ScriptOptions) -> Self {
        self.options = options;
        self
    }

    pub fn transports(&self) -> Vec<Arc<MockTransport>> {
        self.transports.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap().clone()
    }

    pub fn transport_configs(&self) -> Vec<TransportConfig> {
        self.configs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url, config: &TransportConfig) -> Result<Connection> {
        self.urls.lock().unwrap().push(url.clone());
        self.configs.lock().unwrap().push(config.clone());
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport::new(tx, self.options.clone()));
        self.transports.lock().unwrap().push(transport.clone());
        tokio::spawn(play(script, transport.clone()));

        Ok(Connection {
            transport,
            events: rx,
        })
    }
}

/// Collects everything a session reports
#[derive(Clone, Default)]
pub struct Recorder {
    progress: Arc<Mutex<Vec<MeasurementProgress>>>,
    measurements: Arc<Mutex<Vec<SpeedTestMeasurement>>>,
    finishes: Arc<Mutex<Vec<(MeasurementProgress, Option<SpeedTestError>)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callbacks(&self) -> SessionCallbacks {
        let progress = self.progress.clone();
        let measurements = self.measurements.clone();
        let finishes = self.finishes.clone();
        SessionCallbacks::new()
            .on_progress(move |p| progress.lock().unwrap().push(p))
            .on_measurement(move |m| measurements.lock().unwrap().push(m))
            .on_finish(move |p, e| finishes.lock().unwrap().push((p, e)))
    }

    pub fn progress(&self) -> Vec<MeasurementProgress> {
        self.progress.lock().unwrap().clone()
    }

    pub fn measurements(&self) -> Vec<SpeedTestMeasurement> {
        self.measurements.lock().unwrap().clone()
    }

    pub fn finishes(&self) -> Vec<(MeasurementProgress, Option<SpeedTestError>)> {
        self.finishes.lock().unwrap().clone()
    }

    /// The single `on_finish` report; panics if there is not exactly one
    pub fn finish(&self) -> (MeasurementProgress, Option<SpeedTestError>) {
        let finishes = self.finishes();
        assert_eq!(finishes.len(), 1, "on_finish must fire exactly once");
        finishes[0].clone()
    }
}

/// Short timings so tests finish quickly under a paused clock
pub fn fast_config() -> Config {
    Config {
        measurement_duration_ms: 200,
        report_interval_ms: 50,
        close_timeout_ms: 500,
        ..Config::default()
    }
}

pub fn fast_settings() -> SessionSettings {
    SessionSettings::from_config(&fast_config())
}

pub fn download_url() -> Url {
    Url::parse("wss://ndt.test/ndt/v7/download").unwrap()
}

pub fn upload_url() -> Url {
    Url::parse("wss://ndt.test/ndt/v7/upload").unwrap()
}

/// Discovery body listing one server whose URLs point at `host`
pub fn discovery_body(host: &str) -> serde_json::Value {
    serde_json::json!({
        "results": [{
            "machine": "mlab1-test01",
            "location": {"city": "Testville", "country": "ZZ"},
            "urls": {
                "wss:///ndt/v7/download": format!("wss://{}/ndt/v7/download?access_token=d", host),
                "wss:///ndt/v7/upload": format!("wss://{}/ndt/v7/upload?access_token=u", host),
                "ws:///ndt/v7/download": format!("ws://{}/ndt/v7/download?access_token=d", host),
                "ws:///ndt/v7/upload": format!("ws://{}/ndt/v7/upload?access_token=u", host)
            }
        }]
    })
}
