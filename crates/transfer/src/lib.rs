//! Resilient chunked transfer engine.
//!
//! - [`relay`]: single-producer/single-consumer byte relay used to overlap
//!   network I/O with local consumption.
//! - [`ProgressStream`]: transparent decorator reporting threshold-gated
//!   progress samples.
//! - [`run_session`]: chunked copy from a re-openable source to a resettable
//!   sink, surviving transient faults within a global retry budget.

mod config;
mod engine;
mod progress;
mod relay;
mod retry;
mod session;

pub use config::{RetryConfig, TransferConfig};
pub use engine::{TransferSummary, run_session};
pub use progress::{PROGRESS_THRESHOLD_PERCENT, ProgressReporter, ProgressSample, ProgressStream};
pub use relay::{RelayError, RelayReader, RelayWriter, relay};
pub use retry::RetryContext;
pub use session::{
    BoxFuture, SinkReset, SourceFactory, TransferSession, TransferState, clear_cursor,
    reset_relay,
};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source ended at offset {offset}, expected {expected} bytes")]
    Truncated { offset: u64, expected: u64 },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("retries exhausted after {retries} retries")]
    ExhaustedRetries {
        retries: u32,
        #[source]
        source: Box<TransferError>,
    },
}

impl TransferError {
    /// Returns `true` if the fault is presumed recoverable by re-acquiring
    /// the source and retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Io(e) => is_transient_io(e),
            TransferError::Truncated { .. } | TransferError::Connection(_) => true,
            TransferError::Auth(_)
            | TransferError::NotFound(_)
            | TransferError::InvalidArgument(_)
            | TransferError::Unsupported(_)
            | TransferError::Config(_)
            | TransferError::Cancelled
            | TransferError::ExhaustedRetries { .. } => false,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    // Relay misuse surfaces through io::Error but is a programming error.
    if RelayError::from_io(e).is_some() {
        return false;
    }
    !matches!(
        e.kind(),
        ErrorKind::NotFound
            | ErrorKind::InvalidInput
            | ErrorKind::PermissionDenied
            | ErrorKind::Unsupported
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_faults_are_transient() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::TimedOut,
        ] {
            assert!(TransferError::Io(io::Error::from(kind)).is_transient());
        }
    }

    #[test]
    fn missing_argument_and_permission_faults_are_not_transient() {
        for kind in [
            io::ErrorKind::NotFound,
            io::ErrorKind::InvalidInput,
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::Unsupported,
        ] {
            assert!(!TransferError::Io(io::Error::from(kind)).is_transient());
        }
    }

    #[test]
    fn relay_misuse_is_not_transient() {
        let err: io::Error = RelayError::InvalidState("closed".into()).into();
        assert!(!TransferError::Io(err).is_transient());
    }

    #[test]
    fn classification_of_domain_faults() {
        assert!(
            TransferError::Truncated {
                offset: 10,
                expected: 100
            }
            .is_transient()
        );
        assert!(TransferError::Connection("reset".into()).is_transient());
        assert!(!TransferError::Auth("expired token".into()).is_transient());
        assert!(!TransferError::Cancelled.is_transient());
        assert!(!TransferError::InvalidArgument("chunk".into()).is_transient());
    }

    #[test]
    fn exhausted_retries_carries_cause() {
        use std::error::Error;

        let err = TransferError::ExhaustedRetries {
            retries: 3,
            source: Box::new(TransferError::Connection("reset".into())),
        };
        assert_eq!(err.to_string(), "retries exhausted after 3 retries");
        let cause = err.source().unwrap();
        assert_eq!(cause.to_string(), "connection error: reset");
        assert!(!err.is_transient());
    }
}
