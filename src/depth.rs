//! Bit depth conversion
//!
//! Stateless conversion between the four sample representations:
//! - 8 ↔ 16 bit integers shift by 8 bits (narrowing truncates toward zero)
//! - integer → float divides by the integer full scale (128 or 32768)
//! - float → integer multiplies by the full scale and rounds; no clamping to
//!   `[-1, 1]` happens first, the result only saturates at the type bounds
//! - float ↔ float is a plain representation change

use crate::types::{AudioFrame, ChannelBuffer, SampleFormat};

const I8_FULL_SCALE: f64 = 128.0;
const I16_FULL_SCALE: f64 = 32768.0;

fn int_to_float<I: Copy + Into<f64>>(samples: &[I], full_scale: f64) -> Vec<f64> {
    samples.iter().map(|&s| s.into() / full_scale).collect()
}

fn float_to_i8(samples: impl Iterator<Item = f64>) -> Vec<i8> {
    samples.map(|s| (s * I8_FULL_SCALE).round() as i8).collect()
}

fn float_to_i16(samples: impl Iterator<Item = f64>) -> Vec<i16> {
    samples.map(|s| (s * I16_FULL_SCALE).round() as i16).collect()
}

/// Convert one channel buffer into `target`, keeping the sample count.
///
/// Returns the input as-is when it is already in the target format.
pub fn convert(buffer: ChannelBuffer, target: SampleFormat) -> ChannelBuffer {
    use ChannelBuffer as B;
    use SampleFormat as F;

    match (buffer, target) {
        (b, t) if b.format() == t => b,

        (B::I8(v), F::I16) => B::I16(v.iter().map(|&s| (s as i16) << 8).collect()),
        (B::I16(v), F::I8) => B::I8(v.iter().map(|&s| (s / 256) as i8).collect()),

        (B::I8(v), F::F32) => B::F32(
            int_to_float(&v, I8_FULL_SCALE)
                .into_iter()
                .map(|s| s as f32)
                .collect(),
        ),
        (B::I8(v), F::F64) => B::F64(int_to_float(&v, I8_FULL_SCALE)),
        (B::I16(v), F::F32) => B::F32(
            int_to_float(&v, I16_FULL_SCALE)
                .into_iter()
                .map(|s| s as f32)
                .collect(),
        ),
        (B::I16(v), F::F64) => B::F64(int_to_float(&v, I16_FULL_SCALE)),

        (B::F32(v), F::I8) => B::I8(float_to_i8(v.iter().map(|&s| s as f64))),
        (B::F32(v), F::I16) => B::I16(float_to_i16(v.iter().map(|&s| s as f64))),
        (B::F64(v), F::I8) => B::I8(float_to_i8(v.iter().copied())),
        (B::F64(v), F::I16) => B::I16(float_to_i16(v.iter().copied())),

        (B::F32(v), F::F64) => B::F64(v.iter().map(|&s| s as f64).collect()),
        (B::F64(v), F::F32) => B::F32(v.iter().map(|&s| s as f32).collect()),

        (b, _) => b,
    }
}

/// Convert every channel of a frame.
pub fn convert_frame(frame: AudioFrame, target: SampleFormat) -> AudioFrame {
    if frame.format() == Some(target) {
        return frame;
    }
    AudioFrame {
        channels: frame
            .channels
            .into_iter()
            .map(|c| convert(c, target))
            .collect(),
        sample_rate: frame.sample_rate,
    }
}

/// Where the depth conversion sits relative to the resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOrder {
    /// Convert first, resample the converted samples.
    BeforeResample,
    /// Resample the source samples, convert the resampled output.
    AfterResample,
}

impl ConversionOrder {
    /// A source narrower than the target is converted before resampling;
    /// anything else is resampled first and converted afterwards.
    pub fn plan(source: SampleFormat, target: SampleFormat) -> Self {
        if source.bits() < target.bits() {
            ConversionOrder::BeforeResample
        } else {
            ConversionOrder::AfterResample
        }
    }
}
