//! Structured logging for the NDT7 client
//!
//! This module provides:
//! - Leveled, structured log entries with per-session context fields
//! - Console, JSON and compact output formats
//! - A protocol logger for discovery and WebSocket session events
//! - An error event logger carrying error category and retry hints

use crate::error::{Result, SpeedTestError};
use crate::models::{Config, TestDirection};
use crate::transport::CloseCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// ANSI color code for console output
    pub fn color_code(&self) -> &'static str {
        match self {
            LogLevel::Trace => "\x1b[37m",
            LogLevel::Debug => "\x1b[36m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Error => "\x1b[31m",
        }
    }

    pub fn reset_code() -> &'static str {
        "\x1b[0m"
    }
}

impl std::str::FromStr for LogLevel {
    type Err = SpeedTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(SpeedTestError::parse(format!("Invalid log level: {}", s))),
        }
    }
}

/// A single structured log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Logger name/component
    pub logger: String,
    /// Correlation ID for tracking related events
    pub correlation_id: Option<String>,
    pub fields: HashMap<String, serde_json::Value>,
}

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    /// Human-readable console format
    Console,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Default)]
struct LogContext {
    session_id: Option<String>,
}

/// Logger with a shared context. Clones share the same context.
#[derive(Clone)]
pub struct Logger {
    min_level: LogLevel,
    use_color: bool,
    format: LogFormat,
    name: String,
    context: Arc<RwLock<LogContext>>,
}

impl Logger {
    pub fn new(name: String) -> Self {
        Self {
            min_level: LogLevel::Info,
            use_color: true,
            format: LogFormat::Console,
            name,
            context: Arc::new(RwLock::new(LogContext::default())),
        }
    }

    /// Create a logger whose level and format follow the configuration
    pub fn with_config(name: String, config: &Config) -> Self {
        let min_level = if config.debug {
            LogLevel::Debug
        } else if config.verbose {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };

        Self {
            min_level,
            use_color: config.enable_color,
            format: if config.debug { LogFormat::Json } else { LogFormat::Console },
            name,
            context: Arc::new(RwLock::new(LogContext::default())),
        }
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn set_session_id(&self, session_id: String) {
        let mut context = self.context.write().await;
        context.session_id = Some(session_id);
    }

    pub fn log(&self, level: LogLevel, message: &str) -> LogEntryBuilder<'_> {
        LogEntryBuilder::new(self, level, message.to_string())
    }

    pub fn debug(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Error, message)
    }

    pub fn would_log(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    async fn write_entry(&self, mut entry: LogEntry) {
        if !self.would_log(entry.level) {
            return;
        }

        let context = self.context.read().await;
        if let Some(session_id) = &context.session_id {
            entry
                .fields
                .insert("session_id".to_string(), serde_json::Value::String(session_id.clone()));
        }
        drop(context);

        let output = match self.format {
            LogFormat::Console => self.format_console(&entry),
            LogFormat::Json => self.format_json(&entry),
        };

        // Keep stdout free for measurement output
        let _ = writeln!(io::stderr(), "{}", output);
    }

    fn format_console(&self, entry: &LogEntry) -> String {
        let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f");
        let level_str = entry.level.as_str();

        let formatted_level = if self.use_color {
            format!("{}{:>5}{}", entry.level.color_code(), level_str, LogLevel::reset_code())
        } else {
            format!("{:>5}", level_str)
        };

        let mut output = format!("{} {} [{}] {}", timestamp, formatted_level, entry.logger, entry.message);

        if let Some(correlation_id) = &entry.correlation_id {
            let short: String = correlation_id.chars().take(8).collect();
            output.push_str(&format!(" [{}]", short));
        }

        if !entry.fields.is_empty() {
            let mut fields: Vec<String> = entry.fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            fields.sort();
            output.push_str(&format!(" {{{}}}", fields.join(", ")));
        }

        output
    }

    fn format_json(&self, entry: &LogEntry) -> String {
        match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(_) => format!(
                "{{\"error\": \"Failed to serialize log entry\", \"message\": {:?}}}",
                entry.message
            ),
        }
    }
}

/// Builder for a single log entry
pub struct LogEntryBuilder<'a> {
    logger: &'a Logger,
    entry: LogEntry,
}

impl<'a> LogEntryBuilder<'a> {
    fn new(logger: &'a Logger, level: LogLevel, message: String) -> Self {
        Self {
            logger,
            entry: LogEntry {
                timestamp: Utc::now(),
                level,
                message,
                logger: logger.name.clone(),
                correlation_id: None,
                fields: HashMap::new(),
            },
        }
    }

    pub fn correlation_id(mut self, id: &str) -> Self {
        self.entry.correlation_id = Some(id.to_string());
        self
    }

    pub fn field<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(json_value) = serde_json::to_value(value) {
            self.entry.fields.insert(key.to_string(), json_value);
        }
        self
    }

    pub fn direction(self, direction: TestDirection) -> Self {
        self.field("direction", direction.as_str())
    }

    pub fn error_info(self, error: &SpeedTestError) -> Self {
        self.field("error", error.to_string())
            .field("error_category", error.category())
            .field("error_retryable", error.is_retryable())
    }

    pub async fn log(self) {
        self.logger.write_entry(self.entry).await;
    }
}

/// Logger for discovery requests and WebSocket session events
#[derive(Clone)]
pub struct ProtocolLogger {
    logger: Logger,
}

impl ProtocolLogger {
    pub fn new(config: &Config) -> Self {
        Self::from_logger(Logger::with_config("NDT7".to_string(), config))
    }

    pub fn from_logger(logger: Logger) -> Self {
        Self { logger }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn log_discovery_attempt(&self, url: &str, attempt: usize, attempts: usize) {
        self.logger
            .debug(&format!("Querying locate service (attempt {}/{})", attempt, attempts))
            .field("url", url)
            .field("attempt", attempt)
            .log()
            .await;
    }

    /// `retryable` is the locator's verdict, which may differ from
    /// [`SpeedTestError::is_retryable`] when capacity retries are enabled
    pub async fn log_discovery_failure(
        &self,
        attempt: usize,
        error: &SpeedTestError,
        retryable: bool,
        will_retry: bool,
    ) {
        self.discovery_failure(attempt, error, retryable, will_retry)
            .log()
            .await;
    }

    fn discovery_failure(
        &self,
        attempt: usize,
        error: &SpeedTestError,
        retryable: bool,
        will_retry: bool,
    ) -> LogEntryBuilder<'_> {
        let level = if will_retry { LogLevel::Warn } else { LogLevel::Error };
        let message = if will_retry {
            format!("Discovery attempt {} failed, retrying: {}", attempt, error)
        } else {
            format!("Discovery failed: {}", error)
        };

        self.logger
            .log(level, &message)
            .field("attempt", attempt)
            .error_info(error)
            .field("error_retryable", retryable)
    }

    pub async fn log_discovery_result(&self, servers: usize, first_machine: Option<&str>) {
        self.logger
            .info(&format!("Locate service returned {} server(s)", servers))
            .field("servers", servers)
            .field("machine", first_machine)
            .log()
            .await;
    }

    pub async fn log_connecting(&self, direction: TestDirection, url: &str) {
        self.logger
            .debug(&format!("Opening {} connection", direction))
            .direction(direction)
            .field("url", url)
            .log()
            .await;
    }

    pub async fn log_connected(&self, direction: TestDirection, url: &str) {
        self.logger
            .info(&format!("Connected for {} test", direction))
            .direction(direction)
            .field("url", url)
            .log()
            .await;
    }

    pub async fn log_connect_failure(&self, direction: TestDirection, url: &str, error: &SpeedTestError) {
        self.logger
            .error(&format!("Failed to open {} connection: {}", direction, error))
            .direction(direction)
            .field("url", url)
            .error_info(error)
            .log()
            .await;
    }

    /// Malformed measurement frames are dropped, not fatal
    pub async fn log_decode_failure(&self, direction: TestDirection, error: &SpeedTestError) {
        self.logger
            .warn(&format!("Dropping {} measurement frame: {}", direction, error))
            .direction(direction)
            .log()
            .await;
    }

    pub async fn log_policy_violation(&self, direction: TestDirection, frame_len: usize) {
        self.logger
            .warn("Server sent a binary frame during upload, closing")
            .direction(direction)
            .field("frame_len", frame_len)
            .field("close_code", CloseCode::PolicyViolation.as_u16())
            .log()
            .await;
    }

    pub async fn log_close_request_failure(&self, direction: TestDirection, code: CloseCode, error: &SpeedTestError) {
        self.logger
            .debug(&format!("Close request ({}) not sent: {}", code, error))
            .direction(direction)
            .field("close_code", code.as_u16())
            .log()
            .await;
    }

    pub async fn log_session_closed(
        &self,
        direction: TestDirection,
        code: CloseCode,
        num_bytes: i64,
        error: Option<&SpeedTestError>,
    ) {
        let builder = match error {
            None => self
                .logger
                .info(&format!("{} test finished ({})", direction, code)),
            Some(error) => self
                .logger
                .warn(&format!("{} test finished with error: {}", direction, error))
                .error_info(error),
        };

        builder
            .direction(direction)
            .field("close_code", code.as_u16())
            .field("num_bytes", num_bytes)
            .log()
            .await;
    }
}

impl Default for ProtocolLogger {
    /// Quiet logger for library use: warnings and errors only
    fn default() -> Self {
        let mut logger = Logger::new("NDT7".to_string());
        logger.set_level(LogLevel::Warn);
        Self::from_logger(logger)
    }
}

/// Logs errors that end a test run
pub struct ErrorEventLogger {
    logger: Logger,
}

impl ErrorEventLogger {
    pub fn new(config: &Config) -> Self {
        Self {
            logger: Logger::with_config("ERR".to_string(), config),
        }
    }

    pub async fn log_error(&self, error: &SpeedTestError, context: Option<&str>, correlation_id: Option<&str>) {
        let message = match context {
            Some(ctx) => format!("{}: {}", ctx, error),
            None => error.to_string(),
        };

        let mut builder = self
            .logger
            .error(&message)
            .error_info(error)
            .field("exit_code", error.exit_code());

        if let Some(id) = correlation_id {
            builder = builder.correlation_id(id);
        }
        if let Some(ctx) = context {
            builder = builder.field("context", ctx);
        }

        builder.log().await;
    }
}

/// Creates loggers that share a session ID
pub struct LoggerFactory {
    config: Config,
    session_id: String,
}

impl LoggerFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub async fn create_logger(&self, name: &str) -> Logger {
        let logger = Logger::with_config(name.to_string(), &self.config);
        logger.set_session_id(self.session_id.clone()).await;
        logger
    }

    pub async fn create_protocol_logger(&self) -> ProtocolLogger {
        ProtocolLogger::from_logger(self.create_logger("NDT7").await)
    }

    pub fn create_error_logger(&self) -> ErrorEventLogger {
        ErrorEventLogger::new(&self.config)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
