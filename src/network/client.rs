//! TCP client for fixed-size binary sensor packets.
//!
//! Wire exchange, per connection:
//! 1. connect, send the ASCII auth token, read and discard one handshake chunk
//! 2. per poll: send the ASCII request command, read exactly `packet_size` bytes
//!
//! Every socket operation runs under the configured I/O timeout and races the
//! cancellation token, so neither a silent peer nor a shutdown can stall the caller.

use super::NetworkSource;
use crate::config::{EndpointConfig, ProtocolConfig, Settings};
use crate::error::{IngestError, IngestResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Persistent TCP connection to one sensor endpoint.
pub struct TcpSensorClient {
    endpoint: EndpointConfig,
    protocol: ProtocolConfig,
    io_timeout: Duration,
    // Held for the whole of connect/fetch/disconnect, so at most one connect is in flight.
    stream: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
}

impl TcpSensorClient {
    pub fn new(endpoint: EndpointConfig, protocol: ProtocolConfig, io_timeout: Duration) -> Self {
        Self {
            endpoint,
            protocol,
            io_timeout,
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Client for `endpoint` using the protocol constants and I/O timeout from `settings`.
    pub fn from_settings(endpoint: EndpointConfig, settings: &Settings) -> Self {
        Self::new(
            endpoint,
            settings.protocol.clone(),
            settings.timing.io_timeout(),
        )
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Runs one socket step under the I/O timeout, abandoning it if `cancel` fires.
    async fn io_step<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        step: F,
    ) -> IngestResult<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            result = tokio::time::timeout(self.io_timeout, step) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(IngestError::Transport(err)),
                Err(_) => Err(IngestError::Timeout {
                    operation,
                    after: self.io_timeout,
                }),
            },
        }
    }

    async fn open(&self, cancel: &CancellationToken) -> IngestResult<TcpStream> {
        let address = self.endpoint.address();
        let mut stream = self
            .io_step("connecting", cancel, TcpStream::connect(address.as_str()))
            .await?;
        stream.set_nodelay(true)?;

        self.io_step(
            "sending auth token",
            cancel,
            stream.write_all(self.protocol.auth_token.as_bytes()),
        )
        .await?;

        let mut handshake = vec![0u8; self.protocol.handshake_buffer];
        let read = self
            .io_step("reading handshake", cancel, stream.read(&mut handshake))
            .await?;
        if read == 0 {
            return Err(IngestError::ConnectionClosed);
        }
        debug!(sensor = %self.endpoint.name, bytes = read, "Handshake response discarded");

        Ok(stream)
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        cancel: &CancellationToken,
    ) -> IngestResult<Vec<u8>> {
        self.io_step(
            "sending request",
            cancel,
            stream.write_all(self.protocol.request_command.as_bytes()),
        )
        .await?;

        let size = self.endpoint.packet_size();
        let mut packet = vec![0u8; size];
        let mut filled = 0;
        // Short reads are normal; keep reading until the packet is complete.
        while filled < size {
            let read = self
                .io_step("reading packet", cancel, stream.read(&mut packet[filled..]))
                .await?;
            if read == 0 {
                return Err(IngestError::ConnectionClosed);
            }
            filled += read;
        }
        Ok(packet)
    }

    async fn lock_stream(
        &self,
        cancel: &CancellationToken,
    ) -> IngestResult<tokio::sync::MutexGuard<'_, Option<TcpStream>>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            guard = self.stream.lock() => Ok(guard),
        }
    }

    async fn release(&self, slot: &mut Option<TcpStream>) {
        self.connected.store(false, Ordering::Release);
        if let Some(mut stream) = slot.take() {
            // Best effort: the peer may already be gone.
            let _ = tokio::time::timeout(self.io_timeout, stream.shutdown()).await;
        }
    }
}

#[async_trait]
impl NetworkSource for TcpSensorClient {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    async fn connect(&self, cancel: &CancellationToken) -> IngestResult<()> {
        let mut slot = self.lock_stream(cancel).await?;
        self.release(&mut slot).await;

        let stream = self.open(cancel).await?;
        *slot = Some(stream);
        self.connected.store(true, Ordering::Release);

        info!(
            sensor = %self.endpoint.name,
            address = %self.endpoint.address(),
            "Connected to sensor"
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn fetch(&self, cancel: &CancellationToken) -> IngestResult<Option<Vec<u8>>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let mut slot = self.lock_stream(cancel).await?;
        let Some(stream) = slot.as_mut() else {
            self.connected.store(false, Ordering::Release);
            return Ok(None);
        };

        match self.exchange(stream, cancel).await {
            Ok(packet) => Ok(Some(packet)),
            Err(err) if err.is_cancellation() => {
                // A half-read packet leaves the stream out of sync.
                self.release(&mut slot).await;
                Err(err)
            }
            Err(err) => {
                warn!(
                    sensor = %self.endpoint.name,
                    error = %err,
                    "Fetch failed, dropping connection"
                );
                self.release(&mut slot).await;
                Ok(None)
            }
        }
    }

    async fn disconnect(&self) {
        let mut slot = self.stream.lock().await;
        if slot.is_some() {
            debug!(sensor = %self.endpoint.name, "Disconnecting");
        }
        self.release(&mut slot).await;
    }
}
