//! Measurement server discovery
//!
//! Queries the locate service for nearby NDT7 servers. Whether a failed
//! attempt is retried follows [`SpeedTestError::is_retryable_with`]; retries
//! run immediately, without backoff, up to the configured retry count.

use crate::error::{Result, SpeedTestError};
use crate::logging::ProtocolLogger;
use crate::models::{Config, TestServer, TestServerResponse};
use reqwest::{Client, StatusCode};
use url::Url;

pub struct ServerLocator {
    client: Client,
    endpoint: Url,
    max_retry_count: u8,
    retry_on_capacity: bool,
    logger: ProtocolLogger,
}

impl ServerLocator {
    pub fn new(config: &Config) -> Result<Self> {
        let endpoint = discovery_endpoint(&config.discovery_url, &config.client_name)?;
        let client = Client::builder()
            .timeout(config.discovery_timeout())
            .user_agent(format!("{}/{}", crate::PKG_NAME, crate::VERSION))
            .build()
            .map_err(|e| SpeedTestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            max_retry_count: config.max_retry_count.min(crate::defaults::MAX_RETRY_COUNT),
            retry_on_capacity: config.retry_on_capacity,
            logger: ProtocolLogger::default(),
        })
    }

    pub fn with_logger(mut self, logger: ProtocolLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Full request URL including `client_name`
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Total number of requests `discover` may make
    pub fn max_attempts(&self) -> usize {
        usize::from(self.max_retry_count) + 1
    }

    /// Return the servers offered by the locate service, nearest first
    pub async fn discover(&self) -> Result<Vec<TestServer>> {
        let attempts = self.max_attempts();

        for attempt in 1..=attempts {
            self.logger
                .log_discovery_attempt(self.endpoint.as_str(), attempt, attempts)
                .await;

            match self.fetch_once().await {
                Ok(servers) => {
                    self.logger
                        .log_discovery_result(servers.len(), servers.first().map(|s| s.machine.as_str()))
                        .await;
                    return Ok(servers);
                }
                Err(error) => {
                    let retryable = self.should_retry(&error);
                    self.logger
                        .log_discovery_failure(attempt, &error, retryable, retryable && attempt < attempts)
                        .await;
                    if !retryable {
                        return Err(error);
                    }
                }
            }
        }

        Err(SpeedTestError::NoDataFromServer)
    }

    fn should_retry(&self, error: &SpeedTestError) -> bool {
        error.is_retryable_with(self.retry_on_capacity)
    }

    async fn fetch_once(&self) -> Result<Vec<TestServer>> {
        let response = self.client.get(self.endpoint.clone()).send().await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Err(SpeedTestError::TestServersOutOfCapacity);
        }
        if !status.is_success() {
            return Err(SpeedTestError::FetchContentFailed(status.as_u16()));
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(SpeedTestError::TestServersOutOfCapacity);
        }

        let decoded: TestServerResponse = serde_json::from_slice(&body)
            .map_err(|e| SpeedTestError::parse(format!("Malformed discovery response: {}", e)))?;
        if decoded.results.is_empty() {
            return Err(SpeedTestError::TestServersOutOfCapacity);
        }

        Ok(decoded.results)
    }
}

/// Append `client_name` to the discovery URL, keeping any existing query
pub fn discovery_endpoint(base: &str, client_name: &str) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| SpeedTestError::InvalidUrl(format!("'{}': {}", base, e)))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(SpeedTestError::InvalidUrl(format!("'{}' is not an HTTP URL", base)));
    }
    url.query_pairs_mut().append_pair("client_name", client_name);
    Ok(url)
}
