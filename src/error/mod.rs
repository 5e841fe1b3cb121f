//! Error handling for the NDT7 client

use crate::transport::CloseCode;
use thiserror::Error;

/// Errors produced by discovery, sessions and the surrounding plumbing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeedTestError {
    /// The discovery endpoint could not be parsed as a URL
    #[error("URL is invalid: {0}")]
    InvalidUrl(String),

    /// The discovery service answered with a non-success status
    #[error("Cannot fetch content (status {0})")]
    FetchContentFailed(u16),

    /// Every discovery attempt failed
    #[error("No data from server")]
    NoDataFromServer,

    /// The discovery service has no server available right now
    #[error("Test servers are out of capacity, please try again later")]
    TestServersOutOfCapacity,

    /// The chosen server does not offer a usable URL for the test
    #[error("Test target is invalid: {0}")]
    InvalidTestUrl(String),

    /// The session closed with a code other than normal closure
    #[error("Cannot close websocket gracefully (code {0})")]
    WebsocketCloseFailed(CloseCode),

    /// The close handshake itself failed
    #[error("Websocket closed with error: {0}")]
    WebsocketCloseWithError(String),

    #[error("Not implemented yet")]
    NotImplemented,

    /// The client was cancelled before or during the run
    #[error("Test cancelled")]
    Cancelled,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network connectivity errors
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// WebSocket transport errors (connect, send, worker shutdown)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Parsing errors (URLs, JSON, etc.)
    #[error("Parsing error: {0}")]
    Parse(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpeedTestError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network(message.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new parsing error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) | Self::InvalidTestUrl(_) => "URL",
            Self::FetchContentFailed(_) | Self::NoDataFromServer | Self::TestServersOutOfCapacity => {
                "DISCOVERY"
            }
            Self::WebsocketCloseFailed(_) | Self::WebsocketCloseWithError(_) => "WEBSOCKET",
            Self::NotImplemented => "UNSUPPORTED",
            Self::Cancelled => "CANCELLED",
            Self::Config(_) => "CONFIG",
            Self::Network(_) => "NETWORK",
            Self::Timeout(_) => "TIMEOUT",
            Self::Transport(_) => "TRANSPORT",
            Self::Parse(_) => "PARSE",
            Self::Io(_) => "IO",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a discovery attempt that failed with this error may be retried,
    /// with capacity exhaustion terminal
    pub fn is_retryable(&self) -> bool {
        self.is_retryable_with(false)
    }

    /// The discovery retry rule.
    ///
    /// Client errors (4xx) and bad endpoints are terminal. Server errors,
    /// connection failures and malformed bodies are retried. Capacity
    /// exhaustion is retried only when `retry_on_capacity` is set.
    pub fn is_retryable_with(&self, retry_on_capacity: bool) -> bool {
        match self {
            Self::FetchContentFailed(status) => !(400..500).contains(status),
            Self::TestServersOutOfCapacity => retry_on_capacity,
            Self::Network(_)
            | Self::Timeout(_)
            | Self::Transport(_)
            | Self::Parse(_)
            | Self::Io(_)
            | Self::NoDataFromServer => true,
            _ => false,
        }
    }

    /// Get exit code for this error type
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Parse(_) | Self::InvalidUrl(_) => 1,
            Self::FetchContentFailed(_) | Self::NoDataFromServer | Self::Network(_) => 2,
            Self::TestServersOutOfCapacity => 3,
            Self::Timeout(_) => 4,
            Self::InvalidTestUrl(_) | Self::Transport(_) => 5,
            Self::WebsocketCloseFailed(_) | Self::WebsocketCloseWithError(_) => 6,
            Self::Io(_) => 7,
            Self::Cancelled => 130,
            Self::NotImplemented | Self::Internal(_) => 99,
        }
    }

    /// Short hint shown below the error by the command-line front-end
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::TestServersOutOfCapacity => Some("All nearby measurement servers are busy. Try again in a few minutes."),
            Self::NoDataFromServer | Self::Network(_) => Some("Check your internet connection and try again."),
            Self::FetchContentFailed(_) => Some("The discovery service rejected the request. Check the discovery URL and client name."),
            Self::Config(_) => Some("Check your .env file, NDT7_* environment variables or command line arguments."),
            Self::Timeout(_) => Some("The server did not answer in time. Try again or use --insecure if TLS is blocked."),
            _ => None,
        }
    }

    /// Format error for console display with color coding
    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();

        if use_color {
            use colored::Colorize;
            match self {
                Self::Config(_) | Self::Parse(_) | Self::InvalidUrl(_) | Self::InvalidTestUrl(_) => {
                    format!("[{}] {}", category.red().bold(), message.red())
                }
                Self::FetchContentFailed(_) | Self::NoDataFromServer | Self::TestServersOutOfCapacity | Self::Network(_) => {
                    format!("[{}] {}", category.yellow().bold(), message.yellow())
                }
                Self::Timeout(_) => format!("[{}] {}", category.blue().bold(), message.blue()),
                Self::WebsocketCloseFailed(_) | Self::WebsocketCloseWithError(_) | Self::Transport(_) => {
                    format!("[{}] {}", category.magenta().bold(), message.magenta())
                }
                Self::Io(_) => format!("[{}] {}", category.cyan().bold(), message.cyan()),
                Self::Cancelled => format!("[{}] {}", category.bold(), message),
                Self::NotImplemented | Self::Internal(_) => {
                    format!("[{}] {}", category.bright_red().bold(), message.bright_red())
                }
            }
        } else {
            format!("[{}] {}", category, message)
        }
    }
}

impl From<std::io::Error> for SpeedTestError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<url::ParseError> for SpeedTestError {
    fn from(error: url::ParseError) -> Self {
        Self::parse(format!("URL parse error: {}", error))
    }
}

impl From<serde_json::Error> for SpeedTestError {
    fn from(error: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {}", error))
    }
}

impl From<reqwest::Error> for SpeedTestError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(error.to_string())
        } else if error.is_connect() || error.is_request() {
            Self::network(error.to_string())
        } else if let Some(status) = error.status() {
            Self::FetchContentFailed(status.as_u16())
        } else {
            Self::network(error.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SpeedTestError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match error {
            WsError::Url(e) => Self::InvalidTestUrl(e.to_string()),
            WsError::Io(e) => Self::network(e.to_string()),
            other => Self::transport(other.to_string()),
        }
    }
}

impl From<std::num::ParseIntError> for SpeedTestError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::parse(format!("Integer parse error: {}", error))
    }
}

impl From<std::str::ParseBoolError> for SpeedTestError {
    fn from(error: std::str::ParseBoolError) -> Self {
        Self::parse(format!("Boolean parse error: {}", error))
    }
}

impl From<dotenv::Error> for SpeedTestError {
    fn from(error: dotenv::Error) -> Self {
        Self::config(format!("Environment file error: {}", error))
    }
}

impl From<anyhow::Error> for SpeedTestError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}

/// Custom Result type for the crate
pub type Result<T> = std::result::Result<T, SpeedTestError>;

/// Error reporter for user feedback in the command-line front-end
pub struct ErrorReporter {
    pub use_color: bool,
    pub verbose: bool,
}

impl ErrorReporter {
    pub fn new(use_color: bool, verbose: bool) -> Self {
        Self { use_color, verbose }
    }

    /// Render an error, with its hint in verbose mode
    pub fn render(&self, error: &SpeedTestError) -> String {
        let mut output = error.format_for_console(self.use_color);
        if self.verbose {
            if let Some(hint) = error.hint() {
                output.push_str("\n\nSuggestion: ");
                output.push_str(hint);
            }
        }
        output
    }

    /// Report an error to the user
    pub fn report_error(&self, error: &SpeedTestError) {
        eprintln!("{}", self.render(error));
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}
