//! Fixed-size binary packet decoding.
//!
//! Every sensor reply is a fixed-size, big-endian frame terminated by a one-byte additive
//! checksum (see [`checksum`]). Both layouts begin with the same 8-byte timestamp:
//!
//! | Variant | Size | Fields |
//! |---|---|---|
//! | Weather | 15 B | `[0:8)` timestamp · `[8:12)` f32 temperature · `[12:14)` i16 pressure · `[14]` checksum |
//! | Coordinates | 21 B | `[0:8)` timestamp · `[8:12)` i32 X · `[12:16)` i32 Y · `[16:20)` i32 Z · `[20]` checksum |
//!
//! Decoders are pure: the same bytes always yield the same [`Reading`] or the same error.

pub mod checksum;
mod coordinates;
mod weather;

pub use checksum::{checksum, validate};
pub use coordinates::CoordinatesDecoder;
pub use weather::WeatherDecoder;

use crate::error::{IngestError, IngestResult};
use crate::reading::{Reading, SensorKind};
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;

/// Turns one raw packet into a [`Reading`].
pub trait PacketDecoder: Send + Sync {
    /// Sensor variant this decoder understands.
    fn kind(&self) -> SensorKind;

    /// Validates length and checksum, then decodes.
    ///
    /// Fails with [`IngestError::InvalidLength`] before looking at the checksum, and with
    /// [`IngestError::ChecksumMismatch`] if the trailing byte is wrong.
    fn decode(&self, packet: &[u8]) -> IngestResult<Reading>;
}

/// Returns the decoder for a sensor variant.
pub fn decoder_for(kind: SensorKind) -> Arc<dyn PacketDecoder> {
    match kind {
        SensorKind::Weather => Arc::new(WeatherDecoder),
        SensorKind::Coordinates => Arc::new(CoordinatesDecoder),
    }
}

/// Length check followed by checksum check.
pub(crate) fn check_frame(packet: &[u8], expected_len: usize) -> IngestResult<()> {
    if packet.len() != expected_len {
        return Err(IngestError::InvalidLength {
            expected: expected_len,
            actual: packet.len(),
        });
    }

    let (&actual, body) = packet.split_last().ok_or(IngestError::InvalidLength {
        expected: expected_len,
        actual: 0,
    })?;
    let expected = checksum(body);
    if expected != actual {
        return Err(IngestError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Copies `N` bytes starting at `offset`. Callers have already checked the frame length.
pub(crate) fn field<const N: usize>(packet: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&packet[offset..offset + N]);
    out
}

/// Decodes the shared 8-byte timestamp header.
///
/// The wire value is in microseconds. It is scaled down by 1000 and read as epoch
/// milliseconds, which lands on the same second as dividing by 1,000,000. Only years
/// 1 through 9999 are accepted, so every line keeps its four-digit year.
pub(crate) fn decode_timestamp(packet: &[u8]) -> IngestResult<DateTime<Utc>> {
    let micros = i64::from_be_bytes(field::<8>(packet, 0));
    DateTime::from_timestamp_millis(micros / 1000)
        .filter(|timestamp| (1..=9999).contains(&timestamp.year()))
        .ok_or(IngestError::InvalidTimestamp(micros))
}
