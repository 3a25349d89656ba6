//! Errors that abort a poll cycle.

use balena_client::ClientError;
use thiserror::Error;

/// A failure that aborts the current poll cycle.
#[derive(Debug, Error)]
pub enum PollError {
    /// A remote read failed (network, authentication, not found).
    #[error("Fleet API request failed: {0}")]
    Api(#[from] ClientError),

    /// A release carried a creation time that is not RFC 3339.
    #[error("Release {release} has invalid created_at {value:?}: {source}")]
    InvalidTimestamp {
        release: u64,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}
