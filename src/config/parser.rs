//! Configuration assembly from defaults, .env, environment and CLI arguments

use crate::{cli::Cli, config::env::EnvManager, error::Result, models::Config};

/// Combines CLI arguments with environment configuration
pub struct ConfigParser {
    cli: Cli,
}

impl ConfigParser {
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Build and validate the effective configuration
    pub fn parse(&self) -> Result<Config> {
        let mut config = Config::default();

        EnvManager::load_env_file(self.cli.debug)?;
        config.merge_from_env()?;
        self.apply_cli_overrides(&mut config);

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI arguments on top of the environment
    pub fn apply_cli_overrides(&self, config: &mut Config) {
        let cli = &self.cli;

        if cli.insecure {
            config.secure = false;
        }
        if let Some(ms) = cli.duration_ms {
            config.measurement_duration_ms = ms;
        }
        if let Some(ms) = cli.interval_ms {
            config.report_interval_ms = ms;
        }
        if let Some(url) = &cli.discovery_url {
            config.discovery_url = url.clone();
        }
        if let Some(name) = &cli.client_name {
            config.client_name = name.clone();
        }
        if let Some(retries) = cli.max_retries {
            config.max_retry_count = retries;
        }
        if cli.retry_on_capacity {
            config.retry_on_capacity = true;
        }
        if let Some(device) = &cli.device_name {
            config.device_name = Some(device.clone());
        }
        if cli.color {
            config.enable_color = true;
        }
        if cli.no_color || cli.json {
            config.enable_color = false;
        }

        // CLI-only flags
        config.verbose = cli.verbose;
        config.debug = cli.debug;
    }
}

/// Convenience wrapper around [`ConfigParser`]
pub fn load_config(cli: Cli) -> Result<Config> {
    ConfigParser::new(cli).parse()
}

/// One line per setting, for `--debug` output
pub fn display_config_summary(config: &Config) -> String {
    [
        format!("Discovery URL: {}", config.discovery_url),
        format!("Client name: {}", config.client_name),
        format!(
            "Discovery: timeout {}s, {} retries, retry on capacity: {}",
            config.discovery_timeout_seconds, config.max_retry_count, config.retry_on_capacity
        ),
        format!("Secure URLs: {}", config.secure),
        format!(
            "Message size: {}..{} bytes, scaling factor {}",
            config.min_message_size, config.max_message_size, config.scaling_factor
        ),
        format!(
            "Timing: duration {}ms, report interval {}ms, close timeout {}ms",
            config.measurement_duration_ms, config.report_interval_ms, config.close_timeout_ms
        ),
        format!("I/O threads: {}", config.io_threads),
        format!("Device: {}", config.device_name.as_deref().unwrap_or("(default route)")),
        format!("Color output: {}", config.enable_color),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "ndt7",
            "download",
            "--insecure",
            "--duration-ms", "3000",
            "--interval-ms", "500",
            "--client-name", "lab-kiosk",
            "--max-retries", "1",
            "--device-name", "wlan0",
            "--no-color",
            "--verbose",
        ]);
        let mut config = Config::default();
        ConfigParser::new(cli).apply_cli_overrides(&mut config);

        assert!(!config.secure);
        assert_eq!(config.measurement_duration_ms, 3000);
        assert_eq!(config.report_interval_ms, 500);
        assert_eq!(config.client_name, "lab-kiosk");
        assert_eq!(config.max_retry_count, 1);
        assert_eq!(config.device_name.as_deref(), Some("wlan0"));
        assert!(!config.enable_color);
        assert!(config.verbose);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_no_flags_keep_environment_values() {
        let cli = Cli::parse_from(["ndt7"]);
        let mut config = Config::default();
        config.measurement_duration_ms = 7000;
        config.secure = false;
        ConfigParser::new(cli).apply_cli_overrides(&mut config);

        assert_eq!(config.measurement_duration_ms, 7000);
        assert!(!config.secure);
    }

    #[test]
    fn test_json_output_disables_color() {
        let cli = Cli::parse_from(["ndt7", "--json"]);
        let mut config = Config::default();
        ConfigParser::new(cli).apply_cli_overrides(&mut config);
        assert!(!config.enable_color);
    }

    #[test]
    fn test_config_summary() {
        let summary = display_config_summary(&Config::default());
        assert!(summary.contains("Discovery URL: https://locate.measurementlab.net"));
        assert!(summary.contains("scaling factor 16"));
        assert!(summary.contains("report interval 250ms"));
        assert!(summary.contains("Device: (default route)"));
    }
}
