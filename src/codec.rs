//! Measurement codec for NDT7 text frames

use crate::error::{Result, SpeedTestError};
use crate::models::SpeedTestMeasurement;

/// Decode one inbound text frame.
///
/// Unknown keys are ignored and missing sections stay `None`. Anything that
/// is not a JSON object is rejected; callers drop such frames and keep the
/// session running.
pub fn decode_measurement(text: &str) -> Result<SpeedTestMeasurement> {
    serde_json::from_str(text)
        .map_err(|e| SpeedTestError::parse(format!("Malformed measurement frame: {}", e)))
}
