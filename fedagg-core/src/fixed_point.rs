//! Fixed-point encoding of model values
//!
//! All aggregation arithmetic happens on unsigned 64-bit integers. A real
//! number `x` is represented as `trunc(x * 2^fractional_bits)` in two's
//! complement, i.e. as an element of the ring of integers modulo 2^64, which
//! is also the ring the clients' additive secret shares live in.
//!
//! Encoding never fails:
//! * values are truncated toward zero after scaling,
//! * values outside the signed 64-bit range saturate to `i64::MIN`/`i64::MAX`,
//! * `NaN` encodes to zero.

use serde::{Deserialize, Serialize};

/// Number of fractional bits used when none is configured
pub const DEFAULT_FRACTIONAL_BITS: u32 = 16;

/// Upper bound on the fractional bits, leaves at least one integer bit and
/// the sign bit
pub const MAX_FRACTIONAL_BITS: u32 = 62;

/// Converts between `f64` and the fixed-point ring representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPointCodec {
    fractional_bits: u32,
}

impl Default for FixedPointCodec {
    fn default() -> Self {
        Self {
            fractional_bits: DEFAULT_FRACTIONAL_BITS,
        }
    }
}

impl FixedPointCodec {
    /// Returns `None` if `fractional_bits` exceeds [`MAX_FRACTIONAL_BITS`]
    pub fn new(fractional_bits: u32) -> Option<Self> {
        (fractional_bits <= MAX_FRACTIONAL_BITS).then_some(Self { fractional_bits })
    }

    pub fn fractional_bits(&self) -> u32 {
        self.fractional_bits
    }

    fn scale(&self) -> f64 {
        (1u64 << self.fractional_bits) as f64
    }

    pub fn encode(&self, x: f64) -> u64 {
        // float to int `as` casts saturate and map NaN to 0
        let scaled = (x * self.scale()).trunc() as i64;
        scaled as u64
    }

    pub fn decode(&self, v: u64) -> f64 {
        (v as i64) as f64 / self.scale()
    }

    /// Decodes an accumulated sum, reducing it into the ring first
    pub fn decode_wide(&self, v: u128) -> f64 {
        self.decode(v as u64)
    }

    /// Re-encodes `v` at `1/divisor` of its value
    ///
    /// The division happens in floating point, so the result carries the
    /// truncation of one encoding step.
    pub fn rescale(&self, v: u64, divisor: usize) -> u64 {
        self.encode(self.decode(v) / divisor as f64)
    }
}
