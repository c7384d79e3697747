use thiserror::Error;

/// Failure of a single call to an external oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Non-success HTTP status. Whether it is retried is up to the retry policy.
    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection failure, timeout, or a broken response stream
    #[error("oracle transport failure: {0}")]
    Transport(String),

    #[error("failed to decode oracle response: {0}")]
    Decode(String),

    #[error("oracle returned an empty response")]
    EmptyResponse,

    #[error("no oracle API key configured")]
    MissingCredential,
}

impl OracleError {
    pub fn status(&self) -> Option<u16> {
        match self {
            OracleError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Terminal result of a bounded retry loop that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: OracleError },

    #[error("non-retryable failure on attempt {attempt}: {source}")]
    Fatal {
        attempt: u32,
        #[source]
        source: OracleError,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Fatal { attempt, .. } => *attempt,
        }
    }
}

/// Reasons a single raw report item could not become an issue.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("report item is not an object (found {0})")]
    NotAnObject(&'static str),

    #[error("malformed report item: {0}")]
    Malformed(#[from] serde_json::Error),
}
