//! Configuration data model and validation

use crate::error::{Result, SpeedTestError};
use crate::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Discovery endpoint, without the `client_name` query parameter
    #[serde(default = "default_discovery_url")]
    pub discovery_url: String,

    /// Identifier sent to the discovery service
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Timeout for a single discovery request
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_seconds: u64,

    /// Additional discovery attempts after the first one
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u8,

    /// Treat "out of capacity" (204 / empty result) as retryable
    #[serde(default)]
    pub retry_on_capacity: bool,

    /// Use `wss` test URLs instead of `ws`
    #[serde(default = "default_secure")]
    pub secure: bool,

    /// Starting upload payload size, and minimum non-final fragment size
    #[serde(default = "default_min_message_size")]
    pub min_message_size: usize,

    /// Upper bound on upload payload size, and maximum frame size
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Lookahead multiplier of the upload flow controller
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: usize,

    /// Upload measurement duration
    #[serde(default = "default_measurement_duration_ms")]
    pub measurement_duration_ms: u64,

    /// Minimum spacing between progress reports
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    /// How long to wait for the peer to finish a client-initiated close
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Worker threads driving the transport
    #[serde(default = "default_io_threads")]
    pub io_threads: usize,

    /// Network interface the test sockets are bound to (`SO_BINDTODEVICE`)
    #[serde(default)]
    pub device_name: Option<String>,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_url: default_discovery_url(),
            client_name: default_client_name(),
            discovery_timeout_seconds: default_discovery_timeout_secs(),
            max_retry_count: default_max_retry_count(),
            retry_on_capacity: false,
            secure: default_secure(),
            min_message_size: default_min_message_size(),
            max_message_size: default_max_message_size(),
            scaling_factor: default_scaling_factor(),
            measurement_duration_ms: default_measurement_duration_ms(),
            report_interval_ms: default_report_interval_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            io_threads: default_io_threads(),
            device_name: None,
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_seconds)
    }

    pub fn measurement_duration(&self) -> Duration {
        Duration::from_millis(self.measurement_duration_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Validate the configuration and return the first problem found
    pub fn validate(&self) -> Result<()> {
        match url::Url::parse(&self.discovery_url) {
            Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
            Ok(parsed) => {
                return Err(SpeedTestError::config(format!(
                    "Discovery URL must use http or https, got '{}'",
                    parsed.scheme()
                )))
            }
            Err(e) => {
                return Err(SpeedTestError::config(format!(
                    "Invalid discovery URL '{}': {}",
                    self.discovery_url, e
                )))
            }
        }

        if self.client_name.trim().is_empty() {
            return Err(SpeedTestError::config("Client name cannot be empty"));
        }

        if self.discovery_timeout_seconds == 0 {
            return Err(SpeedTestError::config("Discovery timeout must be greater than 0"));
        }

        if self.max_retry_count > defaults::MAX_RETRY_COUNT {
            return Err(SpeedTestError::config(format!(
                "Retry count cannot exceed {}",
                defaults::MAX_RETRY_COUNT
            )));
        }

        if self.min_message_size == 0 || self.max_message_size == 0 {
            return Err(SpeedTestError::config("Message sizes must be greater than 0"));
        }

        if self.min_message_size > self.max_message_size {
            return Err(SpeedTestError::config(format!(
                "Minimum message size ({}) exceeds maximum message size ({})",
                self.min_message_size, self.max_message_size
            )));
        }

        if self.scaling_factor < 2 {
            return Err(SpeedTestError::config("Scaling factor must be at least 2"));
        }

        if self.measurement_duration_ms == 0 {
            return Err(SpeedTestError::config("Measurement duration must be greater than 0"));
        }

        if self.report_interval_ms == 0 {
            return Err(SpeedTestError::config("Report interval must be greater than 0"));
        }

        if self.io_threads == 0 {
            return Err(SpeedTestError::config("At least one I/O thread is required"));
        }

        if matches!(&self.device_name, Some(name) if name.trim().is_empty()) {
            return Err(SpeedTestError::config("Device name cannot be empty"));
        }

        Ok(())
    }

    /// Merge `NDT7_*` environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("NDT7_DISCOVERY_URL") {
            self.discovery_url = url.trim().to_string();
        }

        if let Ok(name) = std::env::var("NDT7_CLIENT_NAME") {
            self.client_name = name.trim().to_string();
        }

        merge_parsed("NDT7_DISCOVERY_TIMEOUT", &mut self.discovery_timeout_seconds)?;
        merge_parsed("NDT7_MAX_RETRIES", &mut self.max_retry_count)?;
        merge_parsed("NDT7_RETRY_ON_CAPACITY", &mut self.retry_on_capacity)?;
        merge_parsed("NDT7_SECURE", &mut self.secure)?;
        merge_parsed("NDT7_MIN_MESSAGE_SIZE", &mut self.min_message_size)?;
        merge_parsed("NDT7_MAX_MESSAGE_SIZE", &mut self.max_message_size)?;
        merge_parsed("NDT7_SCALING_FACTOR", &mut self.scaling_factor)?;
        merge_parsed("NDT7_DURATION_MS", &mut self.measurement_duration_ms)?;
        merge_parsed("NDT7_REPORT_INTERVAL_MS", &mut self.report_interval_ms)?;
        merge_parsed("NDT7_CLOSE_TIMEOUT_MS", &mut self.close_timeout_ms)?;
        merge_parsed("NDT7_IO_THREADS", &mut self.io_threads)?;

        if let Ok(device) = std::env::var("NDT7_DEVICE_NAME") {
            self.device_name = Some(device.trim().to_string());
        }
        merge_parsed("ENABLE_COLOR", &mut self.enable_color)?;

        Ok(())
    }
}

fn merge_parsed<T>(key: &str, target: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(key) {
        *target = value
            .trim()
            .parse()
            .map_err(|e| SpeedTestError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
    }
    Ok(())
}

// Default value functions for serde
fn default_discovery_url() -> String {
    defaults::DISCOVERY_URL.to_string()
}

fn default_client_name() -> String {
    defaults::CLIENT_NAME.to_string()
}

fn default_discovery_timeout_secs() -> u64 {
    defaults::DISCOVERY_TIMEOUT.as_secs()
}

fn default_max_retry_count() -> u8 {
    defaults::MAX_RETRY_COUNT
}

fn default_secure() -> bool {
    true
}

fn default_min_message_size() -> usize {
    defaults::MIN_MESSAGE_SIZE
}

fn default_max_message_size() -> usize {
    defaults::MAX_MESSAGE_SIZE
}

fn default_scaling_factor() -> usize {
    defaults::SCALING_FACTOR
}

fn default_measurement_duration_ms() -> u64 {
    defaults::MEASUREMENT_DURATION.as_millis() as u64
}

fn default_report_interval_ms() -> u64 {
    defaults::REPORT_INTERVAL.as_millis() as u64
}

fn default_close_timeout_ms() -> u64 {
    defaults::CLOSE_TIMEOUT.as_millis() as u64
}

fn default_io_threads() -> usize {
    defaults::IO_THREADS
}

fn default_enable_color() -> bool {
    defaults::DEFAULT_ENABLE_COLOR
}
