use thiserror::Error;

/// Categorical error code attached to every [`ScreeningError`].
///
/// These are the codes the service boundary maps onto HTTP statuses; the core
/// only produces the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION")]
    Validation,
    #[serde(rename = "DATA_LOAD")]
    DataLoad,
    #[serde(rename = "EXTERNAL_API")]
    ExternalApi,
    #[serde(rename = "DATA_NOT_FOUND")]
    DataNotFound,
    #[serde(rename = "INTERNAL")]
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::DataLoad => "DATA_LOAD",
            ErrorKind::ExternalApi => "EXTERNAL_API",
            ErrorKind::DataNotFound => "DATA_NOT_FOUND",
            ErrorKind::Internal => "INTERNAL",
        };
        write!(f, "{code}")
    }
}

#[derive(Debug, Error)]
pub enum ScreeningError {
    /// Malformed address, transaction hash, or parameter. Never retried.
    #[error("invalid {what}: {value}")]
    Validation { what: &'static str, value: String },

    /// Sanctions source read or parse failure (anything but a missing file).
    #[error("failed to load sanctions data: {0}")]
    DataLoad(String),

    /// Indexer transport, timeout, or upstream failure. Retriable by the
    /// caller with backoff.
    #[error("{service} request for {identifier} failed: {reason}")]
    ExternalApi {
        service: &'static str,
        identifier: String,
        reason: String,
    },

    /// The local request budget for the indexer is exhausted.
    #[error("rate limit exceeded: {current}/{limit} requests in window, resets at {resets_at}")]
    RateLimited {
        current: u32,
        limit: u32,
        /// Seconds since epoch at which the window rolls over.
        resets_at: i64,
    },

    /// The identifier has no data in the indexer.
    #[error("no data found for {0}")]
    DataNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ScreeningError {
    pub fn validation(what: &'static str, value: impl Into<String>) -> Self {
        ScreeningError::Validation {
            what,
            value: value.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ScreeningError::Validation { .. } => ErrorKind::Validation,
            ScreeningError::DataLoad(_) | ScreeningError::Toml(_) => ErrorKind::DataLoad,
            ScreeningError::ExternalApi { .. } | ScreeningError::RateLimited { .. } => {
                ErrorKind::ExternalApi
            }
            ScreeningError::DataNotFound(_) => ErrorKind::DataNotFound,
            ScreeningError::Internal(_) | ScreeningError::Io(_) | ScreeningError::Json(_) => {
                ErrorKind::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ScreeningError>;
