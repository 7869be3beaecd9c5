use super::{check_frame, decode_timestamp, field, PacketDecoder};
use crate::error::IngestResult;
use crate::reading::{Reading, SensorKind};

/// Decoder for 21-byte coordinate packets (signed X, Y, Z).
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatesDecoder;

impl PacketDecoder for CoordinatesDecoder {
    fn kind(&self) -> SensorKind {
        SensorKind::Coordinates
    }

    fn decode(&self, packet: &[u8]) -> IngestResult<Reading> {
        check_frame(packet, SensorKind::Coordinates.packet_size())?;

        let timestamp = decode_timestamp(packet)?;
        let x = i32::from_be_bytes(field::<4>(packet, 8));
        let y = i32::from_be_bytes(field::<4>(packet, 12));
        let z = i32::from_be_bytes(field::<4>(packet, 16));

        Ok(Reading::new(
            timestamp,
            SensorKind::Coordinates,
            format!("X: {x}, Y: {y}, Z: {z}"),
        ))
    }
}
