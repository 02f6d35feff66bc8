//! Error types for the probe client.

use thiserror::Error;

/// Errors raised while building or using the probe client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    /// The request failed at the transport level (connect, TLS, proxy, timeout).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    /// The credentials cannot be carried in an `Authorization` header.
    #[error("invalid credentials: {0}")]
    Credentials(#[from] http::header::InvalidHeaderValue),

    /// The proxy host and port do not form a valid proxy URL.
    #[error("invalid proxy address: {0}")]
    Proxy(#[from] url::ParseError),
}

/// Render an error with its whole `source()` chain.
///
/// Causes already spelled out by an outer message are not repeated.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !out.contains(&message) {
            out.push_str(": ");
            out.push_str(&message);
        }
        source = cause.source();
    }
    out
}
