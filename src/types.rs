//! Core PCM data types
//!
//! An [`AudioFrame`] is one fixed-length slice of planar audio: one
//! [`ChannelBuffer`] per channel, all in the same [`SampleFormat`] and all of
//! the same length.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TranscodeError};

/// Numeric representation of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 8-bit signed integer
    I8,
    /// 16-bit signed integer
    I16,
    /// 32-bit IEEE float
    F32,
    /// 64-bit IEEE float
    F64,
}

impl SampleFormat {
    /// Map a bit depth (8, 16, 32, 64) to its format.
    pub fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            8 => Ok(SampleFormat::I8),
            16 => Ok(SampleFormat::I16),
            32 => Ok(SampleFormat::F32),
            64 => Ok(SampleFormat::F64),
            other => Err(TranscodeError::Configuration(format!(
                "unsupported bit depth: {}",
                other
            ))),
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            SampleFormat::I8 => 8,
            SampleFormat::I16 => 16,
            SampleFormat::F32 => 32,
            SampleFormat::F64 => 64,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::F32 | SampleFormat::F64)
    }
}

/// Samples of a single channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelBuffer {
    I8(Vec<i8>),
    I16(Vec<i16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ChannelBuffer {
    /// A zero-filled buffer of `len` samples.
    pub fn silence(format: SampleFormat, len: usize) -> Self {
        match format {
            SampleFormat::I8 => ChannelBuffer::I8(vec![0; len]),
            SampleFormat::I16 => ChannelBuffer::I16(vec![0; len]),
            SampleFormat::F32 => ChannelBuffer::F32(vec![0.0; len]),
            SampleFormat::F64 => ChannelBuffer::F64(vec![0.0; len]),
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            ChannelBuffer::I8(_) => SampleFormat::I8,
            ChannelBuffer::I16(_) => SampleFormat::I16,
            ChannelBuffer::F32(_) => SampleFormat::F32,
            ChannelBuffer::F64(_) => SampleFormat::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChannelBuffer::I8(v) => v.len(),
            ChannelBuffer::I16(v) => v.len(),
            ChannelBuffer::F32(v) => v.len(),
            ChannelBuffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen every sample to `f64` without rescaling.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            ChannelBuffer::I8(v) => v.iter().map(|&s| s as f64).collect(),
            ChannelBuffer::I16(v) => v.iter().map(|&s| s as f64).collect(),
            ChannelBuffer::F32(v) => v.iter().map(|&s| s as f64).collect(),
            ChannelBuffer::F64(v) => v.clone(),
        }
    }

    /// Build a buffer of `format` from `f64` values without rescaling.
    ///
    /// Integer targets round to nearest and saturate at the type bounds.
    pub fn from_f64(format: SampleFormat, samples: &[f64]) -> Self {
        match format {
            SampleFormat::I8 => {
                ChannelBuffer::I8(samples.iter().map(|&s| s.round() as i8).collect())
            }
            SampleFormat::I16 => {
                ChannelBuffer::I16(samples.iter().map(|&s| s.round() as i16).collect())
            }
            SampleFormat::F32 => ChannelBuffer::F32(samples.iter().map(|&s| s as f32).collect()),
            SampleFormat::F64 => ChannelBuffer::F64(samples.to_vec()),
        }
    }

    /// Value cast into another representation. Returns `self` untouched when
    /// the format already matches.
    pub fn cast(self, format: SampleFormat) -> Self {
        if self.format() == format {
            return self;
        }
        ChannelBuffer::from_f64(format, &self.to_f64())
    }
}

/// One multi-channel slice of PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub channels: Vec<ChannelBuffer>,
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Build a frame, checking that every channel shares one format and one
    /// length.
    pub fn new(channels: Vec<ChannelBuffer>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(TranscodeError::Configuration(
                "frame sample rate must be positive".into(),
            ));
        }
        if let Some(first) = channels.first() {
            let (format, len) = (first.format(), first.len());
            for (i, ch) in channels.iter().enumerate().skip(1) {
                if ch.format() != format {
                    return Err(TranscodeError::Configuration(format!(
                        "channel {} is {:?}, expected {:?}",
                        i,
                        ch.format(),
                        format
                    )));
                }
                if ch.len() != len {
                    return Err(TranscodeError::Configuration(format!(
                        "channel {} has {} samples, expected {}",
                        i,
                        ch.len(),
                        len
                    )));
                }
            }
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// A silent frame, mostly useful for flush markers and tests.
    pub fn silence(format: SampleFormat, channels: usize, len: usize, sample_rate: u32) -> Self {
        Self {
            channels: (0..channels)
                .map(|_| ChannelBuffer::silence(format, len))
                .collect(),
            sample_rate,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel (the shortest channel wins).
    pub fn len(&self) -> usize {
        self.channels.iter().map(|c| c.len()).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Format of the first channel, `None` for a channel-less frame.
    pub fn format(&self) -> Option<SampleFormat> {
        self.channels.first().map(|c| c.format())
    }
}
