//! Custom error types for the ingestion pipeline.
//!
//! This module defines the primary error type, `IngestError`, shared by every stage of the
//! pipeline. Using the `thiserror` crate, it gives a single, consistent vocabulary for the
//! ways a sensor poll can go wrong, from socket failures to corrupt packets to shutdown races.
//!
//! ## Error Hierarchy
//!
//! - **Transport** (`Transport`, `Timeout`, `ConnectionClosed`, `NoData`): socket-level failures.
//!   Transient; the producer disconnects, backs off and retries.
//! - **Malformed packet** (`InvalidLength`, `ChecksumMismatch`, `InvalidTimestamp`): the packet is
//!   discarded and the producer treats it exactly like a transport failure.
//! - **`QueueClosed`**: a push raced with shutdown. Producers stop instead of retrying.
//! - **`SinkWrite`**: a single line could not be written. The consumer reports it and keeps going.
//! - **`Config` / `Configuration`**: parse or semantic errors in the settings, caught at startup.
//! - **`Cancelled`**: not a failure. Loops exit silently when they see it.
//! - **`Task`**: a spawned loop panicked or was aborted.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the pipeline error type.
pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Timed out after {after:?} while {operation}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("No data received from sensor '{sensor}'")]
    NoData { sensor: String },

    #[error("Invalid packet length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Checksum mismatch: computed {expected:#04x}, packet carries {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Timestamp {0} is outside the representable range")]
    InvalidTimestamp(i64),

    #[error("Queue has been marked complete")]
    QueueClosed,

    #[error("Sink write error: {0}")]
    SinkWrite(std::io::Error),

    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    Task(String),
}

impl From<figment::Error> for IngestError {
    fn from(err: figment::Error) -> Self {
        IngestError::Config(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Task(err.to_string())
    }
}

impl IngestError {
    /// Failures a producer recovers from by disconnecting and retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::Transport(_)
                | IngestError::Timeout { .. }
                | IngestError::ConnectionClosed
                | IngestError::NoData { .. }
                | IngestError::InvalidLength { .. }
                | IngestError::ChecksumMismatch { .. }
                | IngestError::InvalidTimestamp(_)
        )
    }

    /// True for cooperative cancellation, which loops must treat as a clean exit.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}
