//! Client construction errors and transport failure mapping

use shop_bench_core::TransportErrorKind;
use std::error::Error as StdError;
use std::io;

/// Failures while building a [`CommerceClient`](crate::CommerceClient)
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The base URL is not an absolute http(s) URL
    #[error("invalid base URL {0:?}: expected http:// or https://")]
    InvalidBaseUrl(String),

    /// reqwest could not build its client
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Map a reqwest failure to the transport kind the classifier understands
pub fn classify_transport(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    if let Some(kind) = io_kind(err) {
        match kind {
            io::ErrorKind::TimedOut => return TransportErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused => return TransportErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => return TransportErrorKind::ConnectionReset,
            _ => {}
        }
    }

    if err.is_connect() {
        return TransportErrorKind::ConnectionRefused;
    }
    if chain_mentions(err, "connection closed") || chain_mentions(err, "reset") {
        return TransportErrorKind::ConnectionReset;
    }
    TransportErrorKind::Other
}

fn io_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = cause.source();
    }
    None
}

fn chain_mentions(err: &reqwest::Error, needle: &str) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = source {
        if cause.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }
        source = cause.source();
    }
    false
}
