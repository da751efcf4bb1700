//! Streaming PCM transcoder
//!
//! Captured multi-channel PCM frames flow through an optional bit depth
//! conversion and sample-rate conversion into a codec running in its own
//! execution context. Encoded chunks come back incrementally as events; the
//! final flush yields the complete container.
//!
//! - [`Recorder`]: the pipeline and its idle / recording / paused / flushed
//!   state machine
//! - [`Resampler`]: chunk-invariant linear and box-filter resampling
//! - [`CodecWorker`]: ordered request/response dispatch to a [`Codec`]
//! - [`WavCodec`] and [`LossyCodec`]: the two backends

pub mod codec;
pub(crate) mod config;
pub(crate) mod depth;
pub(crate) mod error;
pub(crate) mod events;
pub(crate) mod logging;
pub(crate) mod recorder;
pub mod resample;
pub(crate) mod source;
pub(crate) mod types;
pub(crate) mod worker;

#[cfg(test)]
pub(crate) mod tests;

pub use codec::{
    parse_header, Codec, CodecSession, CodecWorker, ExternalEncoder, ExternalEncoderFactory,
    Finished, LossyCodec, WavCodec, WavHeader,
};
pub use config::{
    generate_default_config, nearest_supported_rate, ConfigFile, EncoderConfig, EncoderSettings,
    LoggingSettings, LossyConfig, LossySettings, ResamplerConfig, StereoMode, DEFAULT_CHUNK_SIZE,
    LOSSY_SAMPLE_RATES,
};
pub use depth::{convert as convert_depth, convert_frame, ConversionOrder};
pub use error::{Result, TranscodeError};
pub use events::{Event, Observers, SubscriptionId};
pub use logging::init_logging;
pub use recorder::{PipelineState, Recorder, RecorderEvent, RecorderEventKind, RecorderStatus};
pub use resample::{
    ChunkAssembler, ResampleKernel, ResampleMode, Resampler, ResamplerEvent, ResamplerEventKind,
    ResamplerState,
};
pub use source::{FrameHandler, PushSource, Source};
pub use types::{AudioFrame, ChannelBuffer, SampleFormat};
pub use worker::Reply;
