//! # Input Synthesis
//!
//! Fresh pseudo-random input for every run. Values are drawn uniformly in
//! `[-1, 1)` and encoded per [`DataFormat`]:
//!
//! | Format    | Encoding                                   |
//! |-----------|--------------------------------------------|
//! | Float     | IEEE f16 / f32 / f64, little endian        |
//! | Fixed     | `round(v * 2^frac)`, clamped to the width  |
//! | Quantized | `round(v / scale) + zero_point`, clamped   |
//!
//! The generator is a xorshift64* seeded from the configuration, so runs
//! are reproducible across boots.

use crate::workload::{DataFormat, IoSpec};

const FALLBACK_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

/// Deterministic input generator
#[derive(Debug, Clone)]
pub struct InputRng {
    state: u64,
}

impl InputRng {
    /// Create a generator; a zero seed is replaced by a fixed constant
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { FALLBACK_SEED } else { seed },
        }
    }

    /// Next raw value
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform value in `[-1, 1)`
    pub fn next_unit(&mut self) -> f32 {
        // 24 bits: exact in an f32 mantissa
        let bits = (self.next_u64() >> 40) as u32;
        bits as f32 / (1u32 << 23) as f32 - 1.0
    }

    /// Fill `buf` with `spec.elements` encoded values
    ///
    /// Returns the number of bytes written.
    pub fn fill(&mut self, spec: &IoSpec, buf: &mut [u8]) -> usize {
        let width = spec.format.element_size();
        if width == 0 {
            return 0;
        }
        let count = spec.elements.min(buf.len() / width);
        for chunk in buf[..count * width].chunks_exact_mut(width) {
            let v = self.next_unit();
            encode(spec.format, v, chunk);
        }
        count * width
    }
}

fn encode(format: DataFormat, v: f32, out: &mut [u8]) {
    match format {
        DataFormat::Float { bits: 64 } => out.copy_from_slice(&(v as f64).to_le_bytes()),
        DataFormat::Float { bits: 32 } => out.copy_from_slice(&v.to_le_bytes()),
        DataFormat::Float { bits: 16 } => out.copy_from_slice(&f16_bits(v).to_le_bytes()),
        // Rejected before the loop
        DataFormat::Float { .. } => out.fill(0),
        DataFormat::Fixed {
            bits,
            signed,
            frac_bits,
        } => {
            let scale = (1u64 << frac_bits.min(62)) as f32;
            let q = clamp(round(v * scale), bits, signed);
            write_int(q, out);
        }
        DataFormat::Quantized {
            bits,
            signed,
            scale,
            zero_point,
        } => {
            let q = if scale == 0.0 {
                zero_point as i64
            } else {
                round(v / scale).saturating_add(zero_point as i64)
            };
            write_int(clamp(q, bits, signed), out);
        }
    }
}

/// IEEE binary16 encoding of `v`, round to nearest
///
/// Out-of-range magnitudes become infinity; NaN is not expected here.
fn f16_bits(v: f32) -> u16 {
    let x = v.to_bits();
    let sign = ((x >> 16) & 0x8000) as u16;
    let exp = ((x >> 23) & 0xFF) as i32 - 127 + 15;
    let man = x & 0x007F_FFFF;

    if exp >= 0x1F {
        return sign | 0x7C00;
    }
    if exp <= 0 {
        // Subnormal or zero
        if exp < -10 {
            return sign;
        }
        let m = man | 0x0080_0000;
        let shift = (14 - exp) as u32;
        let half = (m >> shift) + ((m >> (shift - 1)) & 1);
        return sign | half as u16;
    }
    // A mantissa carry rolls into the exponent, which is still correct
    let half = ((exp as u32) << 10) | (man >> 13);
    sign | (half + ((man >> 12) & 1)) as u16
}

/// Round half away from zero
fn round(x: f32) -> i64 {
    if x >= 0.0 {
        (x + 0.5) as i64
    } else {
        (x - 0.5) as i64
    }
}

/// Clamp to the range of a `bits`-wide integer
fn clamp(q: i64, bits: u8, signed: bool) -> i64 {
    let bits = bits.clamp(1, 63) as u32;
    let (min, max) = if signed {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    };
    q.clamp(min, max)
}

fn write_int(q: i64, out: &mut [u8]) {
    let bytes = q.to_le_bytes();
    let n = out.len().min(bytes.len());
    out[..n].copy_from_slice(&bytes[..n]);
}
