//! Lossy backend
//!
//! The bitstream itself comes from an [`ExternalEncoder`], treated as a
//! black box. This module adapts it to the codec protocol: it negotiates a
//! supported sample rate, feeds planar float samples and, at the end of a
//! stream, closes the encoder and opens a fresh one for the next stream.

use bytes::{Bytes, BytesMut};
use std::sync::Arc;

use super::{Codec, CodecSession};
use crate::config::{nearest_supported_rate, EncoderConfig, LossyConfig, LOSSY_SAMPLE_RATES};
use crate::error::{Result, TranscodeError};
use crate::types::{AudioFrame, ChannelBuffer, SampleFormat};

/// An opaque compressed-audio encoder.
pub trait ExternalEncoder: Send {
    /// Encode planar samples, one slice per channel.
    fn encode(&mut self, channels: &[Vec<f32>]) -> Result<Bytes>;

    /// Emit whatever the encoder still buffers.
    fn flush(&mut self) -> Result<Bytes>;

    fn close(&mut self);
}

/// Opens external encoders for a negotiated configuration.
pub trait ExternalEncoderFactory: Send + Sync + 'static {
    fn open(&self, config: &EncoderConfig, lossy: &LossyConfig) -> Result<Box<dyn ExternalEncoder>>;
}

impl<F> ExternalEncoderFactory for F
where
    F: Fn(&EncoderConfig, &LossyConfig) -> Result<Box<dyn ExternalEncoder>> + Send + Sync + 'static,
{
    fn open(&self, config: &EncoderConfig, lossy: &LossyConfig) -> Result<Box<dyn ExternalEncoder>> {
        self(config, lossy)
    }
}

pub struct LossyCodec {
    factory: Arc<dyn ExternalEncoderFactory>,
    lossy: LossyConfig,
}

impl LossyCodec {
    pub fn new(factory: impl ExternalEncoderFactory, lossy: LossyConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            lossy,
        }
    }

    pub fn lossy_config(&self) -> &LossyConfig {
        &self.lossy
    }
}

impl Codec for LossyCodec {
    fn name(&self) -> &'static str {
        "lossy"
    }

    fn negotiate(&self, config: &EncoderConfig) -> Result<EncoderConfig> {
        config.validate()?;
        if config.format != SampleFormat::F32 {
            return Err(TranscodeError::Configuration(format!(
                "lossy encoder takes 32-bit float input, got {} bits",
                config.format.bits()
            )));
        }
        if self.lossy.bitrate_kbps == 0 {
            return Err(TranscodeError::Configuration("bitrate must be positive".into()));
        }

        let sample_rate = nearest_supported_rate(config.sample_rate, &LOSSY_SAMPLE_RATES)
            .unwrap_or(config.sample_rate);
        if sample_rate != config.sample_rate {
            tracing::debug!(
                requested = config.sample_rate,
                sample_rate,
                "snapping to supported sample rate"
            );
        }
        Ok(EncoderConfig {
            sample_rate,
            ..config.clone()
        })
    }

    fn create(&self, config: &EncoderConfig) -> Result<Box<dyn CodecSession>> {
        let encoder = self.factory.open(config, &self.lossy)?;
        Ok(Box::new(LossySession {
            factory: self.factory.clone(),
            config: config.clone(),
            lossy: self.lossy.clone(),
            encoder,
        }))
    }

    fn assemble(&self, _config: &EncoderConfig, chunks: &[Bytes]) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(chunks.iter().map(|c| c.len()).sum());
        for chunk in chunks {
            out.extend_from_slice(chunk);
        }
        Ok(out.freeze())
    }
}

struct LossySession {
    factory: Arc<dyn ExternalEncoderFactory>,
    config: EncoderConfig,
    lossy: LossyConfig,
    encoder: Box<dyn ExternalEncoder>,
}

impl LossySession {
    fn reopen(&mut self) -> Result<()> {
        self.encoder.close();
        self.encoder = self.factory.open(&self.config, &self.lossy)?;
        Ok(())
    }
}

impl CodecSession for LossySession {
    fn encode(&mut self, frame: AudioFrame) -> Result<Bytes> {
        if frame.channel_count() < self.config.channels {
            return Err(TranscodeError::ChannelMismatch {
                source_channels: frame.channel_count(),
                encoder_channels: self.config.channels,
            });
        }
        let channels = frame
            .channels
            .into_iter()
            .take(self.config.channels)
            .map(|c| match c {
                ChannelBuffer::F32(samples) => Ok(samples),
                other => Err(TranscodeError::Codec(format!(
                    "lossy encoder takes 32-bit float input, got {} bits",
                    other.format().bits()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        self.encoder.encode(&channels)
    }

    fn flush(&mut self) -> Result<Bytes> {
        let tail = self.encoder.flush()?;
        self.reopen()?;
        Ok(tail)
    }

    fn reset(&mut self) -> Result<()> {
        self.reopen()
    }
}

impl Drop for LossySession {
    fn drop(&mut self) {
        self.encoder.close();
    }
}
