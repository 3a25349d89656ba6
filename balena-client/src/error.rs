use thiserror::Error;

/// Errors returned by fleet API calls.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Release {0} not found")]
    ReleaseNotFound(u64),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("Fleet API unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias using [`ClientError`].
pub type Result<T> = std::result::Result<T, ClientError>;
