use thiserror::Error;

/// Request-level faults. Anything that reaches the orchestrator as one of
/// these ends the whole mirror run.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Root document {url} returned HTTP {status}")]
    RootStatus { url: String, status: reqwest::StatusCode },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Mirror cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// Why a single resource could not be saved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("size {size} bytes exceeds limit of {limit} bytes")]
    SizeLimit { size: u64, limit: u64 },

    #[error("filesystem error: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

impl FailureReason {
    /// Only transport-level faults are worth another attempt. Size and
    /// filesystem failures will not change on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::Transport(_) | FailureReason::Timeout | FailureReason::Status(_)
        )
    }

    pub fn io(e: std::io::Error) -> Self {
        FailureReason::Io(e.to_string())
    }
}

impl From<reqwest::Error> for FailureReason {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FailureReason::Timeout
        } else if let Some(status) = e.status() {
            FailureReason::Status(status.as_u16())
        } else {
            FailureReason::Transport(e.to_string())
        }
    }
}
