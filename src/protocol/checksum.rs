//! Additive 8-bit packet checksum.
//!
//! The last byte of every packet equals the sum of all preceding bytes modulo 256.

/// Sum of `data` modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Checks that the trailing byte of `frame` matches the checksum of everything before it.
///
/// An empty frame never validates. A single-byte frame validates iff that byte is zero.
pub fn validate(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&received, body)) => checksum(body) == received,
        None => false,
    }
}
