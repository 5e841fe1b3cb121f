//! NDT7 Client
//!
//! A client for the M-Lab NDT7 throughput measurement protocol. It discovers
//! a nearby measurement server, runs timed download and upload sessions over
//! WebSockets, and reports periodic and final throughput to the caller.

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod locator;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod sampler;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use error::{Result, SpeedTestError};
pub use locator::ServerLocator;
pub use models::{
    Config, MeasurementProgress, SpeedTestMeasurement, TestDirection, TestOrigin, TestServer,
};
pub use orchestrator::{SpeedTestClient, TestType};
pub use session::{DownloadSession, SessionCallbacks, SessionControl, SessionState, UploadSession};
pub use transport::{CloseCode, Connector, Transport, WebSocketConnector};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    pub const DISCOVERY_URL: &str = "https://locate.measurementlab.net/v2/nearest/ndt/ndt7";
    pub const CLIENT_NAME: &str = "ndt7-client-rust";
    pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(60);
    /// Upper bound on additional discovery attempts
    pub const MAX_RETRY_COUNT: u8 = 5;

    pub const MIN_MESSAGE_SIZE: usize = 1 << 13;
    pub const MAX_MESSAGE_SIZE: usize = 1 << 23;
    pub const SCALING_FACTOR: usize = 16;

    pub const MEASUREMENT_DURATION: Duration = Duration::from_secs(10);
    pub const REPORT_INTERVAL: Duration = Duration::from_millis(250);
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    pub const IO_THREADS: usize = 4;
    pub const DEFAULT_ENABLE_COLOR: bool = true;
}
