//! Error types for the relay

use std::net::SocketAddr;

/// Error type for relay setup and server operations
///
/// Per-connection faults never surface here: they are logged and handled at
/// the session boundary. This type covers configuration, binding, and
/// listener failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from a listener or socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Two topics share a name
    #[error("duplicate topic: {0}")]
    DuplicateTopic(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
