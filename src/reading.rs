//! Decoded sensor observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of sensor layouts understood on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Temperature + pressure, 15-byte packets.
    Weather,
    /// X/Y/Z position, 21-byte packets.
    Coordinates,
}

impl SensorKind {
    /// Fixed packet size in bytes, checksum included.
    pub const fn packet_size(self) -> usize {
        match self {
            SensorKind::Weather => 15,
            SensorKind::Coordinates => 21,
        }
    }

    /// Label written into the sink line.
    pub const fn label(self) -> &'static str {
        match self {
            SensorKind::Weather => "Weather",
            SensorKind::Coordinates => "Coordinates",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A validated, decoded observation.
///
/// Readings are never mutated after the decoder builds them. Ownership moves
/// producer → queue → consumer, and the consumer drops each one after writing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    kind: SensorKind,
    payload: String,
}

impl Reading {
    /// Timestamps are kept at second precision; sub-second parts are dropped.
    pub fn new(timestamp: DateTime<Utc>, kind: SensorKind, payload: impl Into<String>) -> Self {
        let whole_seconds = timestamp.timestamp();
        let timestamp = DateTime::from_timestamp(whole_seconds, 0).unwrap_or(timestamp);
        Self {
            timestamp,
            kind,
            payload: payload.into(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// `YYYY-MM-DD HH:MM:SS`, UTC.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Renders the sink line: `[YYYY-MM-DD HH:MM:SS] [<SensorType>] <payload>`.
impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind,
            self.payload
        )
    }
}
