//! # Sensor Ingest Core Library
//!
//! This crate polls binary-protocol TCP sensors, validates and decodes their fixed-size
//! packets, and appends the readings to a flat text log. The library holds the whole
//! pipeline so the CLI (`main.rs`) stays a thin wrapper and tests can drive every stage
//! with fakes.
//!
//! ## Data Flow
//!
//! ```text
//! TcpSensorClient ─raw bytes─▶ PacketDecoder ─Reading─▶ BoundedQueue ─▶ Consumer ─▶ Sink
//!      (one Producer task per endpoint)                  (shared)       (single task)
//! ```
//!
//! ## Crate Structure
//!
//! - **`config`**: `Settings` and `EndpointConfig`, loaded with figment from defaults, TOML and
//!   environment variables.
//! - **`error`**: the `IngestError` enum shared by every stage.
//! - **`reading`**: the immutable `Reading` value and the `SensorKind` enumeration.
//! - **`protocol`**: checksum validation and the weather/coordinates packet decoders.
//! - **`network`**: the `NetworkSource` trait and its TCP implementation.
//! - **`queue`**: the bounded, backpressuring queue between producers and the consumer.
//! - **`storage`**: the `Sink` trait and the append-only file sink.
//! - **`producer`** / **`consumer`**: the two loop kinds.
//! - **`orchestrator`**: wiring, supervision and ordered shutdown.
//! - **`tracing_setup`**: structured logging initialization.

pub mod config;
pub mod consumer;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod producer;
pub mod protocol;
pub mod queue;
pub mod reading;
pub mod storage;
pub mod tracing_setup;

pub use config::{EndpointConfig, Settings};
pub use error::{IngestError, IngestResult};
pub use orchestrator::{Orchestrator, RunSummary};
pub use reading::{Reading, SensorKind};
