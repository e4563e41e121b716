//! CRC-16 integrity checksum.
//!
//! Polynomial 0x1021, seeded with 0xFFFF, processed most-significant bit first
//! with no reflection and no final XOR (the CCITT-FALSE parameter set).

/// Initial register value. Also returned for an empty buffer, where it means
/// "no checksum available" rather than a computed value.
pub const CRC16_SEED: u16 = 0xFFFF;

const CRC16_POLY: u16 = 0x1021;

/// Compute the CRC-16 of `data`.
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_SEED;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Checksum of `data`, or `None` for an empty buffer where only the seed exists.
pub fn checksum(data: &[u8]) -> Option<u16> {
    if data.is_empty() {
        None
    } else {
        Some(crc16(data))
    }
}
