use thiserror::Error;

/// Core error type shared across Arbor crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The request never produced a structured answer (network, TLS, timeouts).
    #[error("transport error: {0}")]
    Transport(String),
    /// The remote store answered with an error payload for the whole call.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    /// A query, relationship or record shape the store cannot handle.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Catch-all error for unexpected failures.
    #[error("other error: {0}")]
    Other(String),
}

/// Convenience alias for results returned by Arbor crates.
pub type Result<T> = std::result::Result<T, Error>;
