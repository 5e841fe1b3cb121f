//! Data models shared by discovery, sessions and callers

pub mod config;
pub mod measurement;
pub mod server;

pub use config::Config;
pub use measurement::{
    AppInfo, BbrInfo, ConnectionInfo, MeasurementProgress, SpeedTestMeasurement, TcpInfo,
    TestDirection, TestOrigin,
};
pub use server::{TestServer, TestServerLocation, TestServerResponse, TestServerUrls};
