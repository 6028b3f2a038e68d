//! Classification of fetch failures into a closed set of kinds.
//!
//! [`classify`] walks the source chain of the raw cause looking for
//! timeouts and connection failures before falling back to the HTTP status.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    Timeout,
    Connection,
    Forbidden,
    NotFound,
    RateLimited,
    Other,
    Unknown,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::Forbidden => "forbidden",
            FailureKind::NotFound => "not_found",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Other => "other",
            FailureKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A non-success HTTP response, used as the cause for status failures.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("http status {0}")]
pub struct StatusError(pub u16);

/// A classified fetch failure carrying its underlying cause.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("timeout: {0}")]
    Timeout(#[source] BoxError),
    #[error("connection: {0}")]
    Connection(#[source] BoxError),
    #[error("forbidden: {0}")]
    Forbidden(#[source] BoxError),
    #[error("not_found: {0}")]
    NotFound(#[source] BoxError),
    #[error("rate_limited: {0}")]
    RateLimited(#[source] BoxError),
    #[error("{0}")]
    Other(#[source] BoxError),
    #[error("unknown failure")]
    Unknown,
}

impl FetchFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchFailure::Timeout(_) => FailureKind::Timeout,
            FetchFailure::Connection(_) => FailureKind::Connection,
            FetchFailure::Forbidden(_) => FailureKind::Forbidden,
            FetchFailure::NotFound(_) => FailureKind::NotFound,
            FetchFailure::RateLimited(_) => FailureKind::RateLimited,
            FetchFailure::Other(_) => FailureKind::Other,
            FetchFailure::Unknown => FailureKind::Unknown,
        }
    }
}

/// Maps a raw cause and optional status code to a [`FetchFailure`].
///
/// First match wins: deadline elapsed, transport timeout, connection
/// failure, then status 403/404/429, then any remaining cause as `Other`.
/// With neither a cause nor a recognized status the result is `Unknown`.
pub fn classify(cause: Option<BoxError>, status: Option<u16>) -> FetchFailure {
    let transport = cause.as_deref().and_then(|err| transport_kind(err));
    let cause = match (transport, cause) {
        (Some(FailureKind::Timeout), Some(cause)) => return FetchFailure::Timeout(cause),
        (Some(FailureKind::Connection), Some(cause)) => return FetchFailure::Connection(cause),
        (_, cause) => cause,
    };

    if let Some(code) = status.filter(|code| *code != 0) {
        let wrap = |cause: Option<BoxError>| {
            cause.unwrap_or_else(|| Box::new(StatusError(code)) as BoxError)
        };
        match code {
            403 => return FetchFailure::Forbidden(wrap(cause)),
            404 => return FetchFailure::NotFound(wrap(cause)),
            429 => return FetchFailure::RateLimited(wrap(cause)),
            _ => {}
        }
    }

    match cause {
        Some(cause) => FetchFailure::Other(cause),
        None => FetchFailure::Unknown,
    }
}

fn transport_kind(cause: &(dyn StdError + 'static)) -> Option<FailureKind> {
    let mut current = Some(cause);
    while let Some(err) = current {
        if err.is::<tokio::time::error::Elapsed>() {
            return Some(FailureKind::Timeout);
        }
        if let Some(req) = err.downcast_ref::<reqwest::Error>() {
            if req.is_timeout() {
                return Some(FailureKind::Timeout);
            }
            if req.is_connect() {
                return Some(FailureKind::Connection);
            }
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::TimedOut => return Some(FailureKind::Timeout),
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::AddrNotAvailable => return Some(FailureKind::Connection),
                _ => {}
            }
        }
        current = err.source();
    }
    None
}
