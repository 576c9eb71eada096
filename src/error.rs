//! Error types for the Tenta caching proxy

use thiserror::Error;

/// Result type alias for Tenta operations
pub type Result<T> = std::result::Result<T, TentaError>;

/// Error types that can occur while proxying and caching
#[derive(Error, Debug, Clone)]
pub enum TentaError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cache entry not found: {0}")]
    NotFound(String),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Upstream transport error: {0}")]
    TransportError(String),

    #[error("Upstream timed out: {0}")]
    Timeout(String),

    #[error("Upstream returned 404 for {0}")]
    UpstreamNotFound(String),

    #[error("Upstream returned {status} for {url}")]
    UpstreamServerError { status: u16, url: String },

    #[error("Proxy loop detected")]
    LoopDetected,

    #[error("Store IO error: {0}")]
    StoreIoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for TentaError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            TentaError::NotFound(err.to_string())
        } else {
            TentaError::StoreIoError(err.to_string())
        }
    }
}

impl From<reqwest::Error> for TentaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TentaError::Timeout(err.to_string())
        } else {
            TentaError::TransportError(err.to_string())
        }
    }
}

impl TentaError {
    /// Convert error to the HTTP status code returned to the client
    ///
    /// Upstream timeouts are transport failures from the client's point of
    /// view and map to 502 like any other unreachable origin.
    pub fn to_http_status(&self) -> u16 {
        match self {
            TentaError::NotFound(_) => 404,
            TentaError::UpstreamNotFound(_) => 404,
            TentaError::InvalidKey(_) => 400,
            TentaError::TransportError(_) => 502,
            TentaError::Timeout(_) => 502,
            TentaError::UpstreamServerError { status, .. } => *status,
            TentaError::LoopDetected => 508,
            TentaError::ConfigError(_) => 500,
            TentaError::StoreIoError(_) => 500,
            TentaError::InternalError(_) => 500,
        }
    }

    /// Whether this error means the key simply is not in the store
    pub fn is_not_found(&self) -> bool {
        matches!(self, TentaError::NotFound(_))
    }

    /// Create an error from a non-success upstream status
    pub fn from_upstream_status(status: u16, url: impl Into<String>) -> Self {
        let url = url.into();
        match status {
            404 => TentaError::UpstreamNotFound(url),
            508 => TentaError::LoopDetected,
            _ => TentaError::UpstreamServerError { status, url },
        }
    }
}
