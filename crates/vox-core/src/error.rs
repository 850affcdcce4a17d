use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("API error: {message} (status: {status})")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Tool error: {tool} - {message}")]
    Tool { tool: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Coarse grouping of errors for callers that only need to know where a
/// failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport failures: connection, DNS, timeouts.
    Network,
    /// The completion or search API answered with an error body.
    Upstream,
    /// Missing or malformed configuration, e.g. an absent API key.
    Configuration,
    /// A response could not be decoded.
    Serialization,
    /// An auxiliary tool failed.
    Tool,
    /// Anything raised by this library itself.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Tool => "tool",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn api_with_code(status: u16, message: impl Into<String>, code: Option<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Network(_) | Error::Timeout(_) => ErrorCategory::Network,
            Error::Api { .. } | Error::Auth(_) | Error::RateLimit(_) | Error::InvalidRequest(_) => {
                ErrorCategory::Upstream
            }
            Error::Serialization(_) => ErrorCategory::Serialization,
            Error::Tool { .. } => ErrorCategory::Tool,
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Cancelled | Error::Unknown(_) => ErrorCategory::Internal,
        }
    }

    /// HTTP status reported by the upstream API, when there was one.
    pub fn upstream_code(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Auth(_) => Some(401),
            Error::RateLimit(_) => Some(429),
            Error::InvalidRequest(_) => Some(400),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::RateLimit(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
