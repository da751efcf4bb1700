//! Pipeline configuration
//!
//! Runtime configs for the encoder, the resampler and the lossy backend,
//! plus the TOML file format they can be loaded from.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TranscodeError};
use crate::types::SampleFormat;

/// Samples per channel in every resampled chunk unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Output rates an MPEG-1/2/2.5 layer III encoder can produce
pub const LOSSY_SAMPLE_RATES: [u32; 9] = [
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000,
];

/// Pick the entry of `supported` closest to `rate`. Ties go to the higher
/// rate. Returns `None` for an empty table.
pub fn nearest_supported_rate(rate: u32, supported: &[u32]) -> Option<u32> {
    supported
        .iter()
        .copied()
        .min_by_key(|&candidate| (candidate.abs_diff(rate), std::cmp::Reverse(candidate)))
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Channel count (1 or 2)
    pub channels: usize,

    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Sample representation the encoder consumes
    pub format: SampleFormat,

    /// Streaming mode: chunks are delivered but never retained, so `end`
    /// returns no assembled result
    pub streaming: bool,

    /// Samples per channel of each resampled chunk fed to the encoder
    pub chunk_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44100,
            format: SampleFormat::F32,
            streaming: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=2).contains(&self.channels) {
            return Err(TranscodeError::Configuration(format!(
                "encoder channel count must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(TranscodeError::Configuration(
                "encoder sample rate must be positive".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(TranscodeError::Configuration(
                "chunk size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Resampler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResamplerConfig {
    pub from_rate: u32,
    pub to_rate: u32,
    pub channels: usize,
    /// Samples per channel of each emitted chunk
    pub chunk_size: usize,
    /// Representation of both the accepted input and the emitted chunks
    pub format: SampleFormat,
}

impl ResamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.from_rate == 0 || self.to_rate == 0 || self.channels == 0 || self.chunk_size == 0
        {
            return Err(TranscodeError::Configuration(format!(
                "invalid resampler settings: from={} to={} channels={} chunk_size={}",
                self.from_rate, self.to_rate, self.channels, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Channel mode of the lossy encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoMode {
    Stereo,
    JointStereo,
    DualChannel,
    Mono,
}

/// Lossy backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossyConfig {
    /// Target bitrate in kbit/s
    pub bitrate_kbps: u32,
    pub mode: StereoMode,
}

impl Default for LossyConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 128,
            mode: StereoMode::JointStereo,
        }
    }
}

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Encoder settings
    pub encoder: EncoderSettings,
    /// Lossy backend settings
    pub lossy: Option<LossySettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSettings {
    /// Channel count (1 or 2)
    pub channels: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bit depth (8, 16, 32 or 64)
    pub bit_depth: u16,
    /// Streaming mode
    pub streaming: Option<bool>,
    /// Resampled chunk size
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossySettings {
    /// Bitrate in kbit/s
    pub bitrate_kbps: Option<u32>,
    /// Channel mode
    pub mode: Option<StereoMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("pretty".to_string()),
        }
    }
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TranscodeError::Configuration(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TranscodeError::Configuration(format!("invalid config: {}", e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TranscodeError::Configuration(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content).map_err(|e| {
            TranscodeError::Configuration(format!(
                "failed to write {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let encoder = EncoderConfig::default();
        let lossy = LossyConfig::default();
        Self {
            encoder: EncoderSettings {
                channels: encoder.channels,
                sample_rate: encoder.sample_rate,
                bit_depth: encoder.format.bits(),
                streaming: Some(encoder.streaming),
                chunk_size: Some(encoder.chunk_size),
            },
            lossy: Some(LossySettings {
                bitrate_kbps: Some(lossy.bitrate_kbps),
                mode: Some(lossy.mode),
            }),
            logging: Some(LoggingSettings::default()),
        }
    }

    /// Convert to a validated EncoderConfig
    pub fn encoder_config(&self) -> Result<EncoderConfig> {
        let config = EncoderConfig {
            channels: self.encoder.channels,
            sample_rate: self.encoder.sample_rate,
            format: SampleFormat::from_bits(self.encoder.bit_depth)?,
            streaming: self.encoder.streaming.unwrap_or(false),
            chunk_size: self.encoder.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn lossy_config(&self) -> LossyConfig {
        let defaults = LossyConfig::default();
        match &self.lossy {
            Some(l) => LossyConfig {
                bitrate_kbps: l.bitrate_kbps.unwrap_or(defaults.bitrate_kbps),
                mode: l.mode.unwrap_or(defaults.mode),
            },
            None => defaults,
        }
    }

    pub fn logging_settings(&self) -> LoggingSettings {
        self.logging.clone().unwrap_or_default()
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    ConfigFile::default_config().to_file(path)
}
