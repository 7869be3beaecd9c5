use super::{check_frame, decode_timestamp, field, PacketDecoder};
use crate::error::IngestResult;
use crate::reading::{Reading, SensorKind};

/// Decoder for 15-byte weather packets (temperature + pressure).
#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherDecoder;

impl PacketDecoder for WeatherDecoder {
    fn kind(&self) -> SensorKind {
        SensorKind::Weather
    }

    fn decode(&self, packet: &[u8]) -> IngestResult<Reading> {
        check_frame(packet, SensorKind::Weather.packet_size())?;

        let timestamp = decode_timestamp(packet)?;
        let temperature = f32::from_be_bytes(field::<4>(packet, 8));
        let pressure = i16::from_be_bytes(field::<2>(packet, 12));

        Ok(Reading::new(
            timestamp,
            SensorKind::Weather,
            format!("Temperature: {temperature:.2}°C, Pressure: {pressure} hPa"),
        ))
    }
}
