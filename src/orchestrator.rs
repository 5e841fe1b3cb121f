//! Test orchestration: discovery followed by one session per direction
//!
//! In combined mode the download runs first and the upload starts only once
//! the download session has closed, whatever its outcome. A cancel stops the
//! active session and keeps the next direction from starting. Cancellation
//! is permanent for a client; build a new one to run again.

use crate::error::{Result, SpeedTestError};
use crate::locator::ServerLocator;
use crate::logging::ProtocolLogger;
use crate::models::{Config, MeasurementProgress, SpeedTestMeasurement, TestDirection, TestServer};
use crate::session::{
    DownloadSession, SessionCallbacks, SessionControl, SessionSettings, UploadSession,
};
use crate::transport::{Connector, WebSocketConnector};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

/// Which directions a run measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestType {
    Download,
    Upload,
    DownloadAndUpload,
}

impl TestType {
    /// Directions in execution order
    pub fn directions(&self) -> &'static [TestDirection] {
        match self {
            TestType::Download => &[TestDirection::Download],
            TestType::Upload => &[TestDirection::Upload],
            TestType::DownloadAndUpload => &[TestDirection::Download, TestDirection::Upload],
        }
    }
}

impl FromStr for TestType {
    type Err = SpeedTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "download" => Ok(TestType::Download),
            "upload" => Ok(TestType::Upload),
            "both" | "download_and_upload" | "all" => Ok(TestType::DownloadAndUpload),
            other => Err(SpeedTestError::parse(format!(
                "Invalid test type '{}': expected download, upload or both",
                other
            ))),
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestType::Download => "download",
            TestType::Upload => "upload",
            TestType::DownloadAndUpload => "both",
        };
        f.write_str(name)
    }
}

/// NDT7 speed test client
pub struct SpeedTestClient {
    config: Config,
    connector: Arc<dyn Connector>,
    download_callbacks: SessionCallbacks,
    upload_callbacks: SessionCallbacks,
    logger: ProtocolLogger,
    cancelled: AtomicBool,
    active: Mutex<Option<SessionControl>>,
}

impl SpeedTestClient {
    /// Client using the tokio-tungstenite transport
    pub fn new(config: Config) -> Result<Self> {
        Self::with_connector(config, Arc::new(WebSocketConnector::new()))
    }

    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            logger: ProtocolLogger::new(&config),
            config,
            connector,
            download_callbacks: SessionCallbacks::default(),
            upload_callbacks: SessionCallbacks::default(),
            cancelled: AtomicBool::new(false),
            active: Mutex::new(None),
        })
    }

    pub fn with_logger(mut self, logger: ProtocolLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn on_download_progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(MeasurementProgress) + Send + Sync + 'static,
    {
        self.download_callbacks = self.download_callbacks.on_progress(handler);
        self
    }

    pub fn on_download_measurement<F>(mut self, handler: F) -> Self
    where
        F: Fn(SpeedTestMeasurement) + Send + Sync + 'static,
    {
        self.download_callbacks = self.download_callbacks.on_measurement(handler);
        self
    }

    pub fn on_download_finish<F>(mut self, handler: F) -> Self
    where
        F: Fn(MeasurementProgress, Option<SpeedTestError>) + Send + Sync + 'static,
    {
        self.download_callbacks = self.download_callbacks.on_finish(handler);
        self
    }

    pub fn on_upload_progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(MeasurementProgress) + Send + Sync + 'static,
    {
        self.upload_callbacks = self.upload_callbacks.on_progress(handler);
        self
    }

    pub fn on_upload_measurement<F>(mut self, handler: F) -> Self
    where
        F: Fn(SpeedTestMeasurement) + Send + Sync + 'static,
    {
        self.upload_callbacks = self.upload_callbacks.on_measurement(handler);
        self
    }

    pub fn on_upload_finish<F>(mut self, handler: F) -> Self
    where
        F: Fn(MeasurementProgress, Option<SpeedTestError>) + Send + Sync + 'static,
    {
        self.upload_callbacks = self.upload_callbacks.on_finish(handler);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Discover a server and run the requested directions against it.
    ///
    /// Discovery and connect failures are returned here. Failures after a
    /// session opened go to that direction's finish handler. Returns the
    /// server that was measured.
    pub async fn start(&self, test_type: TestType) -> Result<TestServer> {
        self.ensure_not_cancelled()?;

        let locator = ServerLocator::new(&self.config)?.with_logger(self.logger.clone());
        let servers = locator.discover().await?;
        self.ensure_not_cancelled()?;
        let server = servers
            .into_iter()
            .next()
            .ok_or_else(|| SpeedTestError::InvalidTestUrl("Discovery returned no servers".to_string()))?;

        self.run_against(&server, test_type).await?;
        Ok(server)
    }

    /// Run the requested directions against an already known server
    pub async fn run_against(&self, server: &TestServer, test_type: TestType) -> Result<()> {
        for &direction in test_type.directions() {
            if self.is_cancelled() {
                break;
            }
            let url = server.test_url(direction, self.config.secure)?;
            self.run_session(direction, url).await?;
        }
        Ok(())
    }

    /// Stop the active session and skip any direction not yet started
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(control) = self.lock_active().as_ref() {
            control.stop();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(SpeedTestError::Cancelled);
        }
        Ok(())
    }

    async fn run_session(&self, direction: TestDirection, url: Url) -> Result<()> {
        let settings = SessionSettings::from_config(&self.config);

        let result = match direction {
            TestDirection::Download => {
                let session = DownloadSession::new(url, settings, self.connector.clone())
                    .with_callbacks(self.download_callbacks.clone())
                    .with_logger(self.logger.clone());
                self.activate(session.control());
                session.start().await
            }
            TestDirection::Upload => {
                let session = UploadSession::new(url, settings, self.connector.clone())
                    .with_callbacks(self.upload_callbacks.clone())
                    .with_logger(self.logger.clone());
                self.activate(session.control());
                session.start().await
            }
        };

        self.lock_active().take();
        result
    }

    fn activate(&self, control: SessionControl) {
        let mut active = self.lock_active();
        // A cancel that raced ahead of activation still applies
        if self.is_cancelled() {
            control.stop();
        }
        *active = Some(control);
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<SessionControl>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
