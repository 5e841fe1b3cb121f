//! Measurement servers returned by the discovery service

use crate::error::{Result, SpeedTestError};
use crate::models::measurement::TestDirection;
use serde::{Deserialize, Serialize};
use url::Url;

/// Geographic location of a measurement server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestServerLocation {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

/// Test URLs offered by a server, keyed on the wire by scheme and path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestServerUrls {
    #[serde(rename = "wss:///ndt/v7/download")]
    pub download: String,
    #[serde(rename = "wss:///ndt/v7/upload")]
    pub upload: String,
    #[serde(rename = "ws:///ndt/v7/download")]
    pub insecure_download: String,
    #[serde(rename = "ws:///ndt/v7/upload")]
    pub insecure_upload: String,
}

/// A measurement server candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestServer {
    pub machine: String,
    #[serde(default)]
    pub location: TestServerLocation,
    pub urls: TestServerUrls,
}

/// Discovery response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestServerResponse {
    #[serde(default)]
    pub results: Vec<TestServer>,
}

impl TestServer {
    /// Raw URL string for a direction
    pub fn url_for(&self, direction: TestDirection, secure: bool) -> &str {
        match (direction, secure) {
            (TestDirection::Download, true) => &self.urls.download,
            (TestDirection::Upload, true) => &self.urls.upload,
            (TestDirection::Download, false) => &self.urls.insecure_download,
            (TestDirection::Upload, false) => &self.urls.insecure_upload,
        }
    }

    /// Parsed WebSocket URL for a direction
    pub fn test_url(&self, direction: TestDirection, secure: bool) -> Result<Url> {
        let raw = self.url_for(direction, secure);
        if raw.is_empty() {
            return Err(SpeedTestError::InvalidTestUrl(format!(
                "Cannot locate URL for {} test on {}",
                direction, self.machine
            )));
        }

        let url = Url::parse(raw).map_err(|e| {
            SpeedTestError::InvalidTestUrl(format!("{} URL '{}' is malformed: {}", direction, raw, e))
        })?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(SpeedTestError::InvalidTestUrl(format!(
                "{} URL uses unsupported scheme '{}'",
                direction, other
            ))),
        }
    }

    /// Human-readable location, e.g. "Seattle, US"
    pub fn location_label(&self) -> String {
        match (&self.location.city, &self.location.country) {
            (Some(city), Some(country)) => format!("{}, {}", city, country),
            (Some(city), None) => city.clone(),
            (None, Some(country)) => country.clone(),
            (None, None) => "unknown location".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "results": [{
            "machine": "mlab1-sea07.mlab-oti.measurement-lab.org",
            "location": {"city": "Seattle", "country": "US"},
            "urls": {
                "wss:///ndt/v7/download": "wss://ndt-mlab1-sea07.example.org/ndt/v7/download?access_token=a",
                "wss:///ndt/v7/upload": "wss://ndt-mlab1-sea07.example.org/ndt/v7/upload?access_token=b",
                "ws:///ndt/v7/download": "ws://ndt-mlab1-sea07.example.org/ndt/v7/download?access_token=c",
                "ws:///ndt/v7/upload": "ws://ndt-mlab1-sea07.example.org/ndt/v7/upload?access_token=d"
            }
        }]
    }"#;

    #[test]
    fn test_decode_discovery_response() {
        let response: TestServerResponse = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(response.results.len(), 1);

        let server = &response.results[0];
        assert_eq!(server.machine, "mlab1-sea07.mlab-oti.measurement-lab.org");
        assert_eq!(server.location_label(), "Seattle, US");
        assert!(server.urls.upload.contains("access_token=b"));
    }

    #[test]
    fn test_url_selection() {
        let response: TestServerResponse = serde_json::from_str(SAMPLE).unwrap();
        let server = &response.results[0];

        let secure = server.test_url(TestDirection::Download, true).unwrap();
        assert_eq!(secure.scheme(), "wss");
        assert_eq!(secure.path(), "/ndt/v7/download");

        let insecure = server.test_url(TestDirection::Upload, false).unwrap();
        assert_eq!(insecure.scheme(), "ws");
        assert_eq!(insecure.path(), "/ndt/v7/upload");
    }

    #[test]
    fn test_invalid_test_url() {
        let mut response: TestServerResponse = serde_json::from_str(SAMPLE).unwrap();
        let server = &mut response.results[0];

        server.urls.upload = String::new();
        assert!(matches!(
            server.test_url(TestDirection::Upload, true),
            Err(SpeedTestError::InvalidTestUrl(_))
        ));

        server.urls.download = "https://not-a-websocket.example.org".to_string();
        assert!(matches!(
            server.test_url(TestDirection::Download, true),
            Err(SpeedTestError::InvalidTestUrl(_))
        ));
    }

    #[test]
    fn test_missing_location_is_tolerated() {
        let json = r#"{"machine": "m", "urls": {
            "wss:///ndt/v7/download": "wss://h/ndt/v7/download",
            "wss:///ndt/v7/upload": "wss://h/ndt/v7/upload",
            "ws:///ndt/v7/download": "ws://h/ndt/v7/download",
            "ws:///ndt/v7/upload": "ws://h/ndt/v7/upload"}}"#;
        let server: TestServer = serde_json::from_str(json).unwrap();
        assert_eq!(server.location_label(), "unknown location");
    }
}
