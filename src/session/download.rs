//! Download direction: the server streams, the client counts

use super::{
    begin_close, conclude, open_connection, Conclusion, SessionCallbacks, SessionControl,
    SessionSettings,
};
use crate::codec::decode_measurement;
use crate::error::Result;
use crate::logging::ProtocolLogger;
use crate::models::TestDirection;
use crate::sampler::ProgressSampler;
use crate::transport::{CloseCode, Connection, Connector, TransportEvent};
use std::sync::Arc;
use tokio::time::{sleep_until, Instant};
use url::Url;

/// One download measurement against one server URL
pub struct DownloadSession {
    url: Url,
    settings: SessionSettings,
    connector: Arc<dyn Connector>,
    callbacks: SessionCallbacks,
    control: SessionControl,
    logger: ProtocolLogger,
}

impl DownloadSession {
    pub fn new(url: Url, settings: SessionSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            url,
            settings,
            connector,
            callbacks: SessionCallbacks::default(),
            control: SessionControl::new(),
            logger: ProtocolLogger::default(),
        }
    }

    pub fn with_callbacks(mut self, callbacks: SessionCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_logger(mut self, logger: ProtocolLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Handle for stopping this session from another task
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Run the session to completion.
    ///
    /// Returns `Err` only when the upgrade fails. Any later failure is passed
    /// to `on_finish`.
    pub async fn start(&self) -> Result<()> {
        let direction = TestDirection::Download;
        let Connection {
            transport,
            mut events,
        } = open_connection(
            &*self.connector,
            &self.url,
            &self.settings,
            &self.control,
            &self.logger,
            direction,
        )
        .await?;

        let mut sampler = ProgressSampler::new(
            direction,
            self.settings.report_interval,
            Instant::now(),
            self.callbacks.on_progress.clone(),
        );
        let mut total_bytes: u64 = 0;
        let mut close_deadline: Option<Instant> = None;

        let (code, handshake) = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Text(text)) => match decode_measurement(&text) {
                        Ok(measurement) => {
                            total_bytes += text.len() as u64;
                            if let Some(on_measurement) = self.callbacks.on_measurement.as_ref() {
                                on_measurement(measurement);
                            }
                        }
                        Err(error) => self.logger.log_decode_failure(direction, &error).await,
                    },
                    Some(TransportEvent::Binary(len)) => {
                        total_bytes += len as u64;
                        sampler.maybe_emit(total_bytes);
                    }
                    Some(TransportEvent::Closed { code, handshake }) => break (code, handshake),
                    None => break (
                        CloseCode::MissingCode,
                        Err("transport closed without a close event".to_string()),
                    ),
                },
                _ = self.control.stopped(), if close_deadline.is_none() => {
                    close_deadline = Some(
                        begin_close(
                            &*transport,
                            CloseCode::GoingAway,
                            &self.settings,
                            &self.control,
                            &self.logger,
                            direction,
                        )
                        .await,
                    );
                }
                _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                    break (
                        CloseCode::GoingAway,
                        Err("close handshake timed out".to_string()),
                    );
                }
            }
        };

        let progress = sampler.finish(total_bytes);
        conclude(
            &*transport,
            &self.control,
            &self.callbacks,
            &self.logger,
            Conclusion {
                direction,
                progress,
                code,
                handshake,
                session_error: None,
            },
        )
        .await;
        Ok(())
    }
}
