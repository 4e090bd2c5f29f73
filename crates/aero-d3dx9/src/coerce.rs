//! Numeric conversions between the stored element types.
//!
//! Parameter storage is raw dwords; the element type decides how a dword is interpreted. Every
//! accessor funnels through [`read`] and [`store`] so the conversion rules live in one place.

use tracing::warn;

use crate::types::ParameterType;

/// Written by [`store`] into slots whose type cannot hold a number.
pub const UNSUPPORTED_SENTINEL: u32 = 0x1234_5678;

/// Channel scale of the packed `0xAARRGGBB` form used by `get/set_int` and `get/set_vector`.
const CHANNEL_MAX: f32 = 255.0;

/// A typed number moving between caller and storage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Bool(bool),
    Int(i32),
    Float(f32),
}

impl Number {
    pub fn to_bool(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Int(i) => i != 0,
            Self::Float(f) => f.to_bits() != 0,
        }
    }

    pub fn to_int(self) -> i32 {
        match self {
            Self::Bool(b) => b as i32,
            Self::Int(i) => i,
            Self::Float(f) => f as i32,
        }
    }

    pub fn to_float(self) -> f32 {
        match self {
            Self::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int(i) => i as f32,
            Self::Float(f) => f,
        }
    }
}

/// Interprets a stored dword according to its element type.
pub fn read(ty: ParameterType, word: u32) -> Number {
    match ty {
        ParameterType::Float => Number::Float(f32::from_bits(word)),
        ParameterType::Bool => Number::Bool(word != 0),
        _ => Number::Int(word as i32),
    }
}

/// Converts `value` into a dword of element type `ty`.
///
/// Object element types get [`UNSUPPORTED_SENTINEL`]. The public accessors reject object-typed
/// parameters in their shape gates first, so only a caller storing into such a type directly
/// sees the sentinel.
pub fn store(ty: ParameterType, value: Number) -> u32 {
    match ty {
        ParameterType::Float => value.to_float().to_bits(),
        ParameterType::Bool => value.to_bool() as u32,
        ParameterType::Int | ParameterType::Void => value.to_int() as u32,
        other => {
            warn!(ty = ?other, "numeric store into non-numeric slot");
            UNSUPPORTED_SENTINEL
        }
    }
}

/// Clamps to `[0, 1]` and scales to a byte; NaN saturates to 255.
fn channel_to_byte(v: f32) -> u32 {
    // Ordered so NaN falls through both comparisons to the upper bound.
    let lo = if 0.0 > v { 0.0 } else { v };
    let clamped = if lo < 1.0 { lo } else { 1.0 };
    (clamped * CHANNEL_MAX) as u32
}

/// Packs up to four channels as `A<<24 | R<<16 | G<<8 | B` with `R = c[0]`.
///
/// Alpha is only packed when more than three channels are present.
pub fn pack_color(channels: &[f32]) -> u32 {
    let c = |i: usize| channels.get(i).copied().unwrap_or(0.0);
    let mut packed = channel_to_byte(c(2)) | channel_to_byte(c(1)) << 8 | channel_to_byte(c(0)) << 16;
    if channels.len() > 3 {
        packed |= channel_to_byte(c(3)) << 24;
    }
    packed
}

/// Inverse of [`pack_color`]: `[R, G, B, A]` in `[0, 1]`.
pub fn unpack_color(packed: u32) -> [f32; 4] {
    let byte = |shift: u32| ((packed >> shift) & 0xFF) as f32 / CHANNEL_MAX;
    [byte(16), byte(8), byte(0), byte(24)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_reads_any_nonzero_pattern() {
        assert!(read(ParameterType::Float, (-0.0f32).to_bits()).to_bool());
        assert!(!read(ParameterType::Float, 0).to_bool());
        assert!(read(ParameterType::Int, 0x8000_0000).to_bool());
    }

    #[test]
    fn float_to_int_truncates_toward_zero() {
        assert_eq!(Number::Float(2.9).to_int(), 2);
        assert_eq!(Number::Float(-2.9).to_int(), -2);
        assert_eq!(Number::Bool(true).to_int(), 1);
    }

    #[test]
    fn store_normalises_bools_and_rejects_objects() {
        assert_eq!(store(ParameterType::Bool, Number::Int(7)), 1);
        assert_eq!(store(ParameterType::Float, Number::Bool(true)), 1.0f32.to_bits());
        assert_eq!(store(ParameterType::Texture2D, Number::Int(1)), UNSUPPORTED_SENTINEL);
        assert_eq!(store(ParameterType::String, Number::Float(1.0)), UNSUPPORTED_SENTINEL);
    }

    #[test]
    fn color_packing_clamps_and_orders_channels() {
        assert_eq!(pack_color(&[1.0, 0.0, 0.0]), 0x00FF_0000);
        assert_eq!(pack_color(&[0.0, 0.0, 1.0, 1.0]), 0xFF00_00FF);
        assert_eq!(pack_color(&[2.0, -1.0, f32::NAN, 0.5]), 0x7FFF_00FF);
        let c = unpack_color(0x80FF_4000);
        assert_eq!(c[0], 1.0);
        assert!((c[1] - 64.0 / 255.0).abs() < 1e-6);
        assert_eq!(c[2], 0.0);
        assert!((c[3] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn pack_then_unpack_stays_within_one_step() {
        let input = [0.1, 0.5, 0.9, 0.33];
        let out = unpack_color(pack_color(&input));
        for (a, b) in input.iter().zip(out) {
            assert!((a - b).abs() <= 1.0 / 255.0, "{a} vs {b}");
        }
    }
}
