//! Error types for afterpaint-core
//!
//! The scheduling core itself is infallible. These types cover the layers
//! around it: configuration loading, logging setup, drain timeouts and
//! parsing queue names that arrive as strings.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use crate::logging::LogError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for afterpaint-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Logging initialization errors
    #[error("Logging error: {0}")]
    Log(#[from] LogError),

    /// A queue name that is neither `after-first-paint` nor `after-content-paint`
    #[error(transparent)]
    QueueName(#[from] UnknownQueueName),

    /// Deferred work did not drain in time
    #[error(transparent)]
    Drain(#[from] DrainTimeout),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Returned when parsing a string that does not name a known queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown queue name: {0:?} (expected \"after-first-paint\" or \"after-content-paint\")")]
pub struct UnknownQueueName(pub String);

/// Returned by [`Waiters::wait_until_drained`](crate::waiter::Waiters::wait_until_drained)
/// when work is still outstanding at the deadline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("deferred work still pending after {waited:?}")]
pub struct DrainTimeout {
    pub waited: Duration,
}
