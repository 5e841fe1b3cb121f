//! Environment variable handling and .env file management

use crate::error::{Result, SpeedTestError};
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env from the working directory if it exists.
    ///
    /// Variables already present in the environment are not overridden.
    pub fn load_env_file(debug: bool) -> Result<()> {
        Self::load_env_file_from(Path::new(".env"), debug)
    }

    pub fn load_env_file_from(path: &Path, debug: bool) -> Result<()> {
        if path.exists() {
            dotenv::from_path(path)
                .map_err(|e| SpeedTestError::config(format!("Failed to load {}: {}", path.display(), e)))?;
            if debug {
                eprintln!("Loaded configuration from {}", path.display());
            }
        } else if debug {
            eprintln!("No .env file found, using defaults and CLI arguments");
        }
        Ok(())
    }

    /// Example .env content listing every supported variable
    pub fn create_example_env_content() -> String {
        let mut content = String::from(
            "# NDT7 client configuration\n\
             #\n\
             # Values here are used as defaults and can be overridden by\n\
             # environment variables and command-line arguments.\n\n",
        );
        for (var, description, example) in Self::get_supported_env_vars() {
            content.push_str(&format!("# {}\n# {}={}\n\n", description, var, example));
        }
        content
    }

    pub fn save_example_env_file(path: &Path) -> Result<()> {
        std::fs::write(path, Self::create_example_env_content())
            .map_err(|e| SpeedTestError::config(format!("Failed to write example .env file: {}", e)))
    }

    /// Validate a single variable before it is merged into the configuration
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "NDT7_DISCOVERY_URL" => {
                url::Url::parse(value)
                    .map_err(|e| SpeedTestError::config(format!("Invalid {} '{}': {}", key, value, e)))?;
            }
            "NDT7_CLIENT_NAME" | "NDT7_DEVICE_NAME" => {
                if value.is_empty() {
                    return Err(SpeedTestError::config(format!("{} cannot be empty", key)));
                }
            }
            "NDT7_MAX_RETRIES" => {
                let retries: u8 = parse_value(key, value)?;
                if retries > crate::defaults::MAX_RETRY_COUNT {
                    return Err(SpeedTestError::config(format!(
                        "{} must be between 0 and {}, got: {}",
                        key,
                        crate::defaults::MAX_RETRY_COUNT,
                        retries
                    )));
                }
            }
            "NDT7_DISCOVERY_TIMEOUT" | "NDT7_DURATION_MS" | "NDT7_REPORT_INTERVAL_MS" | "NDT7_CLOSE_TIMEOUT_MS" => {
                let amount: u64 = parse_value(key, value)?;
                if amount == 0 {
                    return Err(SpeedTestError::config(format!("{} must be greater than 0", key)));
                }
            }
            "NDT7_MIN_MESSAGE_SIZE" | "NDT7_MAX_MESSAGE_SIZE" | "NDT7_SCALING_FACTOR" | "NDT7_IO_THREADS" => {
                let amount: usize = parse_value(key, value)?;
                if amount == 0 {
                    return Err(SpeedTestError::config(format!("{} must be greater than 0", key)));
                }
            }
            "NDT7_SECURE" | "NDT7_RETRY_ON_CAPACITY" | "ENABLE_COLOR" => {
                parse_value::<bool>(key, value)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// (variable, description, example)
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("NDT7_DISCOVERY_URL", "Locate service endpoint", crate::defaults::DISCOVERY_URL),
            ("NDT7_CLIENT_NAME", "Client name reported to the locate service", crate::defaults::CLIENT_NAME),
            ("NDT7_DISCOVERY_TIMEOUT", "Discovery request timeout in seconds", "60"),
            ("NDT7_MAX_RETRIES", "Additional discovery attempts (0-5)", "5"),
            ("NDT7_RETRY_ON_CAPACITY", "Retry discovery when servers are out of capacity", "false"),
            ("NDT7_SECURE", "Use wss:// test URLs", "true"),
            ("NDT7_MIN_MESSAGE_SIZE", "Initial upload message size in bytes", "8192"),
            ("NDT7_MAX_MESSAGE_SIZE", "Maximum upload message size in bytes", "8388608"),
            ("NDT7_SCALING_FACTOR", "Upload flow-control lookahead multiplier", "16"),
            ("NDT7_DURATION_MS", "Upload measurement duration in milliseconds", "10000"),
            ("NDT7_REPORT_INTERVAL_MS", "Progress report interval in milliseconds", "250"),
            ("NDT7_CLOSE_TIMEOUT_MS", "Close handshake timeout in milliseconds", "5000"),
            ("NDT7_IO_THREADS", "Runtime worker threads", "4"),
            ("NDT7_DEVICE_NAME", "Network interface to bind test connections to (Linux)", "eth0"),
            ("ENABLE_COLOR", "Enable colored output", "true"),
        ]
    }

    pub fn display_env_help() -> String {
        let mut help = String::from("Supported Environment Variables:\n\n");
        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<24} {}\n", var, description));
            help.push_str(&format!("  {:<24} Example: {}\n\n", "", example));
        }
        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. Default values\n");
        help
    }

    /// Warnings for every supported variable currently set to an invalid value
    pub fn validate_current_env() -> Vec<String> {
        Self::get_supported_env_vars()
            .into_iter()
            .filter_map(|(var, _, _)| {
                let value = std::env::var(var).ok()?;
                Self::validate_env_var(var, &value)
                    .err()
                    .map(|e| format!("Warning: {}", e))
            })
            .collect()
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| SpeedTestError::config(format!("Invalid {} value '{}': {}", key, value, e)))
}
