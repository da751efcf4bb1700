//! Codec backends and the worker that isolates them
//!
//! - `worker`: request/response dispatch to a codec session in its own
//!   execution context, replies resolved strictly in submission order
//! - `wav`: interleaved PCM with a 44-byte RIFF/WAVE header
//! - `lossy`: compressed output through an opaque external encoder

pub mod lossy;
pub mod wav;
pub mod worker;

use bytes::Bytes;

use crate::config::EncoderConfig;
use crate::error::Result;
use crate::types::AudioFrame;

pub use lossy::{ExternalEncoder, ExternalEncoderFactory, LossyCodec};
pub use wav::{parse_header, WavCodec, WavHeader};
pub use worker::{CodecWorker, Finished};

/// Describes one output format. Shared between the caller and the worker
/// thread, so it holds no per-stream state.
pub trait Codec: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Check `config` against what the backend supports, returning the
    /// configuration it will actually use (e.g. with the sample rate snapped
    /// to a supported one).
    fn negotiate(&self, config: &EncoderConfig) -> Result<EncoderConfig>;

    /// Build a session for a negotiated configuration.
    fn create(&self, config: &EncoderConfig) -> Result<Box<dyn CodecSession>>;

    /// Build the complete result from every chunk of one stream. An error
    /// rejects only the `end` request that asked for it.
    fn assemble(&self, config: &EncoderConfig, chunks: &[Bytes]) -> Result<Bytes>;
}

/// Per-stream codec state. Lives on the worker thread only.
pub trait CodecSession: Send {
    /// Encode one frame. May return an empty chunk when the backend buffers.
    fn encode(&mut self, frame: AudioFrame) -> Result<Bytes>;

    /// Drain internal state at the end of a stream and get ready for the next.
    fn flush(&mut self) -> Result<Bytes>;

    /// Discard internal state, starting a fresh stream.
    fn reset(&mut self) -> Result<()>;
}
