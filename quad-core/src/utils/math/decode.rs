//! Raw register decoding shared by the sensor drivers.
//!
//! # Example
//! ```rust
//! use quad_core::utils::math::decode::{sign_extend, unsigned_with_offset};
//! assert_eq!(sign_extend(0xFF, 0xFE), -2);
//! assert_eq!(unsigned_with_offset(0x03, 0xE8, 1000), 0);
//! ```

/// Combine a high and low register byte into a two's complement sample.
///
/// Bit 15 set means the value is `word - 2^16`.
pub fn sign_extend(
    high: u8,
    low: u8,
) -> i16 {
    let word = i32::from(u16::from_be_bytes([high, low]));
    let value = if word & 0x8000 != 0 { word - 0x1_0000 } else { word };
    value as i16
}

/// Combine a high and low register byte and subtract a host-held offset
/// with 16-bit wraparound.
pub fn unsigned_with_offset(
    high: u8,
    low: u8,
    offset: u16,
) -> u16 {
    u16::from_be_bytes([high, low]).wrapping_sub(offset)
}

/// Arithmetic mean of `sum` over `count` samples.
///
/// `count` must be non-zero; callers validate it before sampling.
pub fn mean(
    sum: i64,
    count: u32,
) -> f64 {
    sum as f64 / f64::from(count)
}
