//! Error types for the connection pool

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport) implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connecting to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport is not open")]
    NotOpen,

    #[error("Frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Socket operation timed out after {0:?}")]
    SocketTimeout(Duration),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to open connection to {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("Pool is exhausted - {max_active} connections already active")]
    PoolExhausted { max_active: usize },

    #[error("Timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Connection validation failed")]
    ValidationFailed,

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Connection was not borrowed from this pool")]
    ForeignConnection,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// Whether retrying the borrow later may succeed.
    ///
    /// Closed pools, foreign leases and bad configuration are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::Connection { .. }
                | PoolError::PoolExhausted { .. }
                | PoolError::Timeout(_)
                | PoolError::ValidationFailed
        )
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_keeps_source() {
        let err = PoolError::Connection {
            address: "127.0.0.1:9000".to_string(),
            source: TransportError::NotOpen,
        };

        assert!(err.to_string().contains("127.0.0.1:9000"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(!PoolError::PoolClosed.is_retryable());
        assert!(!PoolError::Cancelled.is_retryable());
        assert!(!PoolError::InvalidConfig("max_active".into()).is_retryable());
    }
}
