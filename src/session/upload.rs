//! Upload direction: the client sends, the server reports what it saw
//!
//! A dedicated task runs the flow-control loop until the measurement
//! duration elapses or a stop is requested. The session task meanwhile
//! handles inbound frames and the close handshake. Binary frames from the
//! server are a protocol violation in this direction.

use super::{
    begin_close, conclude, open_connection, Conclusion, SessionCallbacks, SessionControl,
    SessionSettings,
};
use crate::codec::decode_measurement;
use crate::error::{Result, SpeedTestError};
use crate::logging::ProtocolLogger;
use crate::models::TestDirection;
use crate::sampler::ProgressSampler;
use crate::session::flow::{FlowConfig, FlowController, FlowDecision};
use crate::transport::{CloseCode, Connection, Connector, Transport, TransportEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use url::Url;

/// Pause between iterations while the transport is saturated
const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(1);

/// One upload measurement against one server URL
pub struct UploadSession {
    url: Url,
    settings: SessionSettings,
    connector: Arc<dyn Connector>,
    callbacks: SessionCallbacks,
    control: SessionControl,
    logger: ProtocolLogger,
}

struct SendOutcome {
    sampler: ProgressSampler,
    reported_bytes: u64,
    error: Option<SpeedTestError>,
}

impl UploadSession {
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
        let direction = TestDirection::Upload;
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

        let opened_at = Instant::now();
        let halt = Arc::new(AtomicBool::new(false));
        let progressed = Arc::new(AtomicU64::new(0));
        let sampler = ProgressSampler::new(
            direction,
            self.settings.report_interval,
            opened_at,
            self.callbacks.on_progress.clone(),
        );
        let mut sender: JoinHandle<SendOutcome> = tokio::spawn(send_loop(
            transport.clone(),
            self.settings.flow,
            opened_at + self.settings.measurement_duration,
            sampler,
            halt.clone(),
            progressed.clone(),
            self.control.clone(),
        ));

        let mut outcome: Option<SendOutcome> = None;
        let mut session_error: Option<SpeedTestError> = None;
        let mut close_deadline: Option<Instant> = None;

        let (code, handshake) = loop {
            tokio::select! {
                joined = &mut sender, if outcome.is_none() => {
                    let finished = self.collect(joined, opened_at, &progressed);
                    if let Some(error) = finished.error.clone() {
                        session_error.get_or_insert(error);
                    }
                    outcome = Some(finished);
                    if close_deadline.is_none() {
                        let code = if session_error.is_some() || self.control.is_stop_requested() {
                            CloseCode::GoingAway
                        } else {
                            CloseCode::NormalClosure
                        };
                        close_deadline = Some(self.close_with(&*transport, code).await);
                    }
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Text(text)) => match decode_measurement(&text) {
                        Ok(measurement) => {
                            if let Some(on_measurement) = self.callbacks.on_measurement.as_ref() {
                                on_measurement(measurement);
                            }
                        }
                        Err(error) => self.logger.log_decode_failure(direction, &error).await,
                    },
                    Some(TransportEvent::Binary(len)) => {
                        if session_error.is_none() {
                            halt.store(true, Ordering::Release);
                            self.logger.log_policy_violation(direction, len).await;
                            session_error = Some(SpeedTestError::WebsocketCloseFailed(
                                CloseCode::PolicyViolation,
                            ));
                            if close_deadline.is_none() {
                                close_deadline = Some(
                                    self.close_with(&*transport, CloseCode::PolicyViolation).await,
                                );
                            }
                        }
                    }
                    Some(TransportEvent::Closed { code, handshake }) => break (code, handshake),
                    None => break (
                        CloseCode::MissingCode,
                        Err("transport closed without a close event".to_string()),
                    ),
                },
                _ = self.control.stopped(), if close_deadline.is_none() => {
                    halt.store(true, Ordering::Release);
                    close_deadline = Some(self.close_with(&*transport, CloseCode::GoingAway).await);
                }
                _ = sleep_until(close_deadline.unwrap_or_else(Instant::now)), if close_deadline.is_some() => {
                    break (
                        CloseCode::GoingAway,
                        Err("close handshake timed out".to_string()),
                    );
                }
            }
        };

        halt.store(true, Ordering::Release);
        let mut outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                let finished = self.collect(sender.await, opened_at, &progressed);
                if let Some(error) = finished.error.clone() {
                    session_error.get_or_insert(error);
                }
                finished
            }
        };

        let progress = outcome.sampler.finish(outcome.reported_bytes);
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
                session_error,
            },
        )
        .await;
        Ok(())
    }

    async fn close_with(&self, transport: &dyn Transport, code: CloseCode) -> Instant {
        begin_close(
            transport,
            code,
            &self.settings,
            &self.control,
            &self.logger,
            TestDirection::Upload,
        )
        .await
    }

    /// Recover the sender's outcome. If the sender panicked, the byte count
    /// falls back to the last value it reported.
    fn collect(
        &self,
        joined: std::result::Result<SendOutcome, tokio::task::JoinError>,
        opened_at: Instant,
        progressed: &AtomicU64,
    ) -> SendOutcome {
        joined.unwrap_or_else(|e| SendOutcome {
            sampler: ProgressSampler::new(
                TestDirection::Upload,
                self.settings.report_interval,
                opened_at,
                None,
            ),
            reported_bytes: progressed.load(Ordering::Acquire),
            error: Some(SpeedTestError::internal(format!("Upload sender failed: {}", e))),
        })
    }
}

async fn send_loop(
    transport: Arc<dyn Transport>,
    flow: FlowConfig,
    deadline: Instant,
    mut sampler: ProgressSampler,
    halt: Arc<AtomicBool>,
    progressed: Arc<AtomicU64>,
    control: SessionControl,
) -> SendOutcome {
    let mut flow = FlowController::new(flow);
    let mut error = None;

    while !halt.load(Ordering::Acquire) && !control.is_stop_requested() && Instant::now() < deadline {
        match flow.step(transport.buffered_amount()) {
            FlowDecision::Send(size) => {
                if let Err(e) = transport.send_binary(vec![0u8; size]).await {
                    error = Some(e);
                    break;
                }
                tokio::task::yield_now().await;
            }
            FlowDecision::Backpressure { .. } => tokio::time::sleep(BACKPRESSURE_PAUSE).await,
        }
        let reported = flow.reported_bytes(transport.buffered_amount());
        progressed.fetch_max(reported, Ordering::AcqRel);
        sampler.maybe_emit(reported);
    }

    let reported_bytes = flow.reported_bytes(transport.buffered_amount());
    progressed.fetch_max(reported_bytes, Ordering::AcqRel);
    SendOutcome {
        reported_bytes,
        sampler,
        error,
    }
}
