//! Sensor network sources.
//!
//! A [`NetworkSource`] owns one persistent connection to one sensor endpoint and hands
//! out raw, fixed-size packets. [`TcpSensorClient`] is the production implementation.

mod client;

pub use client::TcpSensorClient;

use crate::error::IngestResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// One sensor connection.
///
/// Every blocking call observes `cancel` and returns [`IngestError::Cancelled`] promptly
/// when it fires.
///
/// [`IngestError::Cancelled`]: crate::error::IngestError::Cancelled
#[async_trait]
pub trait NetworkSource: Send + Sync {
    /// Endpoint name used in logs.
    fn name(&self) -> &str;

    /// Open a fresh connection (dropping any previous one) and complete the handshake.
    async fn connect(&self, cancel: &CancellationToken) -> IngestResult<()>;

    /// Current connection liveness. No side effects.
    fn is_connected(&self) -> bool;

    /// Request and read exactly one packet.
    ///
    /// Returns `Ok(None)` without touching the network when disconnected. I/O failures
    /// disconnect locally and also yield `Ok(None)`; only cancellation is an `Err`.
    async fn fetch(&self, cancel: &CancellationToken) -> IngestResult<Option<Vec<u8>>>;

    /// Close the connection. Safe to call when already disconnected.
    async fn disconnect(&self);
}
