//! Measurement records exchanged with NDT7 servers
//!
//! Every field of a server-sent record is optional: servers routinely omit
//! whole sections, and absence is never a decoding error. Wire key names are
//! fixed by the protocol and kept through `serde(rename)`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a test session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestDirection {
    Download,
    Upload,
}

impl TestDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestDirection::Download => "download",
            TestDirection::Upload => "upload",
        }
    }
}

impl fmt::Display for TestDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the connection produced a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOrigin {
    Client,
    Server,
}

/// Application-level progress: elapsed microseconds and bytes transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(rename = "ElapsedTime")]
    pub elapsed_time: i64,
    #[serde(rename = "NumBytes")]
    pub num_bytes: i64,
}

/// Server-side BBR congestion control state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BbrInfo {
    #[serde(rename = "ElapsedTime", default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<i64>,
    #[serde(rename = "BW", default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<i64>,
    #[serde(rename = "MinRTT", default, skip_serializing_if = "Option::is_none")]
    pub min_rtt: Option<i64>,
    #[serde(rename = "PacingGain", default, skip_serializing_if = "Option::is_none")]
    pub pacing_gain: Option<i64>,
    #[serde(rename = "CwndGain", default, skip_serializing_if = "Option::is_none")]
    pub cwnd_gain: Option<i64>,
}

/// Endpoints and identifier of the measured connection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(rename = "Client", default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(rename = "Server", default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(rename = "UUID", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Kernel TCP_INFO statistics reported by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpInfo {
    #[serde(rename = "BusyTime", default, skip_serializing_if = "Option::is_none")]
    pub busy_time: Option<i64>,
    #[serde(rename = "BytesAcked", default, skip_serializing_if = "Option::is_none")]
    pub bytes_acked: Option<i64>,
    #[serde(rename = "BytesReceived", default, skip_serializing_if = "Option::is_none")]
    pub bytes_received: Option<i64>,
    #[serde(rename = "BytesSent", default, skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<i64>,
    #[serde(rename = "BytesRetrans", default, skip_serializing_if = "Option::is_none")]
    pub bytes_retrans: Option<i64>,
    #[serde(rename = "ElapsedTime", default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<i64>,
    #[serde(rename = "MinRTT", default, skip_serializing_if = "Option::is_none")]
    pub min_rtt: Option<i64>,
    #[serde(rename = "RTT", default, skip_serializing_if = "Option::is_none")]
    pub rtt: Option<i64>,
    #[serde(rename = "RTTVar", default, skip_serializing_if = "Option::is_none")]
    pub rtt_var: Option<i64>,
    #[serde(rename = "RWndLimited", default, skip_serializing_if = "Option::is_none")]
    pub rwnd_limited: Option<i64>,
    #[serde(rename = "SndBufLimited", default, skip_serializing_if = "Option::is_none")]
    pub snd_buf_limited: Option<i64>,
}

/// One measurement message sent by the server as a text frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestMeasurement {
    #[serde(rename = "AppInfo", default, skip_serializing_if = "Option::is_none")]
    pub app_info: Option<AppInfo>,
    #[serde(rename = "BBRInfo", default, skip_serializing_if = "Option::is_none")]
    pub bbr_info: Option<BbrInfo>,
    #[serde(rename = "ConnectionInfo", default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<ConnectionInfo>,
    #[serde(rename = "Origin", default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<TestOrigin>,
    #[serde(rename = "Test", default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TestDirection>,
    #[serde(rename = "TCPInfo", default, skip_serializing_if = "Option::is_none")]
    pub tcp_info: Option<TcpInfo>,
}

/// Client-side progress snapshot, never parsed from the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementProgress {
    #[serde(rename = "AppInfo")]
    pub app_info: AppInfo,
    #[serde(rename = "Origin")]
    pub origin: TestOrigin,
    #[serde(rename = "Test")]
    pub test: TestDirection,
}

impl MeasurementProgress {
    /// Create a client-originated snapshot
    pub fn new(elapsed_micros: i64, num_bytes: i64, direction: TestDirection) -> Self {
        Self {
            app_info: AppInfo {
                elapsed_time: elapsed_micros.max(0),
                num_bytes,
            },
            origin: TestOrigin::Client,
            test: direction,
        }
    }

    pub fn elapsed_micros(&self) -> i64 {
        self.app_info.elapsed_time
    }

    pub fn num_bytes(&self) -> i64 {
        self.app_info.num_bytes
    }

    /// Average throughput since session open, in megabits per second
    pub fn mbps(&self) -> f64 {
        if self.app_info.elapsed_time <= 0 {
            return 0.0;
        }
        (self.app_info.num_bytes as f64 * 8.0) / self.app_info.elapsed_time as f64
    }
}
