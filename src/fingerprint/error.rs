use thiserror::Error;

/// Failure of a single fingerprint lookup
///
/// Every variant is a "no result" for the pipeline; only
/// `InvalidCredentials` and `RateLimited` change session state.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("lookup timed out")]
    Timeout,
    #[error("remote service rate limit reached")]
    RateLimited,
    #[error("remote service rejected the API key")]
    InvalidCredentials,
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl FingerprintError {
    /// Errors that disable remote lookups for the rest of the session.
    pub fn disables_remote(&self) -> bool {
        matches!(self, FingerprintError::InvalidCredentials | FingerprintError::RateLimited)
    }
}

impl From<reqwest::Error> for FingerprintError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FingerprintError::Timeout
        } else if e.is_decode() {
            FingerprintError::Malformed(e.to_string())
        } else {
            FingerprintError::Transport(e.to_string())
        }
    }
}
