//! Command-line interface for the `ndt7` binary

pub mod output;

pub use output::{ConsolePrinter, DirectionResult};

use crate::orchestrator::TestType;
use clap::Parser;

/// NDT7 speed test client - measures download and upload throughput against M-Lab servers
#[derive(Parser, Debug, Clone)]
#[command(name = "ndt7")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directions to measure: download, upload or both
    #[arg(value_name = "TEST", value_parser = parse_test_type, default_value = "both")]
    pub test: TestType,

    /// Use unencrypted ws:// test URLs
    #[arg(long)]
    pub insecure: bool,

    /// Upload measurement duration in milliseconds
    #[arg(long, value_name = "MS", value_parser = parse_millis)]
    pub duration_ms: Option<u64>,

    /// Minimum spacing between progress reports in milliseconds
    #[arg(long, value_name = "MS", value_parser = parse_millis)]
    pub interval_ms: Option<u64>,

    /// Override the locate service endpoint
    #[arg(long, value_name = "URL")]
    pub discovery_url: Option<String>,

    /// Client name sent to the locate service
    #[arg(long, value_name = "NAME")]
    pub client_name: Option<String>,

    /// Additional discovery attempts after the first (0-5)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(0..=5))]
    pub max_retries: Option<u8>,

    /// Retry discovery when all servers report being out of capacity
    #[arg(long)]
    pub retry_on_capacity: bool,

    /// Bind test connections to this network interface (Linux only)
    #[arg(long, value_name = "IFACE")]
    pub device_name: Option<String>,

    /// Print progress and results as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Force colored output
    #[arg(long)]
    pub color: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Check for conflicting flags
    pub fn validate(&self) -> Result<(), String> {
        if self.color && self.no_color {
            return Err("Cannot specify both --color and --no-color".to_string());
        }
        Ok(())
    }

    pub fn use_colors(&self) -> bool {
        if self.color {
            true
        } else if self.no_color || self.json {
            false
        } else {
            supports_color()
        }
    }
}

fn parse_test_type(s: &str) -> Result<TestType, String> {
    s.parse::<TestType>().map_err(|e| e.to_string())
}

/// Parse a positive millisecond count, at most one hour
fn parse_millis(s: &str) -> Result<u64, String> {
    if s.starts_with('+') {
        return Err(format!("Invalid duration: {}", s));
    }

    match s.parse::<u64>() {
        Ok(0) => Err("Duration must be greater than 0".to_string()),
        Ok(ms) if ms > 3_600_000 => Err("Duration cannot exceed 3600000 ms".to_string()),
        Ok(ms) => Ok(ms),
        Err(_) => Err(format!("Invalid duration: {}", s)),
    }
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    cfg!(unix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["ndt7"]);
        assert_eq!(cli.test, TestType::DownloadAndUpload);
        assert!(!cli.insecure);
        assert_eq!(cli.duration_ms, None);
        assert_eq!(cli.max_retries, None);
        assert_eq!(cli.device_name, None);
    }

    #[test]
    fn test_all_options() {
        let cli = Cli::parse_from([
            "ndt7",
            "upload",
            "--insecure",
            "--duration-ms", "5000",
            "--interval-ms", "100",
            "--client-name", "lab-kiosk",
            "--max-retries", "2",
            "--retry-on-capacity",
            "--device-name", "eth1",
            "--json",
            "--no-color",
            "--verbose",
        ]);

        assert_eq!(cli.test, TestType::Upload);
        assert!(cli.insecure);
        assert_eq!(cli.duration_ms, Some(5000));
        assert_eq!(cli.interval_ms, Some(100));
        assert_eq!(cli.client_name.as_deref(), Some("lab-kiosk"));
        assert_eq!(cli.max_retries, Some(2));
        assert!(cli.retry_on_capacity);
        assert_eq!(cli.device_name.as_deref(), Some("eth1"));
        assert!(cli.json);
        assert!(!cli.use_colors());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Cli::try_parse_from(["ndt7", "sideways"]).is_err());
        assert!(Cli::try_parse_from(["ndt7", "--duration-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["ndt7", "--duration-ms", "+5"]).is_err());
        assert!(Cli::try_parse_from(["ndt7", "--max-retries", "6"]).is_err());
    }

    #[test]
    fn test_color_conflict() {
        let cli = Cli::parse_from(["ndt7", "--color", "--no-color"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("250"), Ok(250));
        assert!(parse_millis("3600001").is_err());
        assert!(parse_millis("abc").is_err());
    }
}
