//! Sample-rate conversion
//!
//! - `kernel`: the synchronous per-channel algorithms and their carried state
//! - `chunker`: fixed-size output chunks with excess carry
//! - `resampler`: the kernel running in its own execution context

pub mod chunker;
pub mod kernel;
pub mod resampler;

pub use chunker::ChunkAssembler;
pub use kernel::{ResampleKernel, ResampleMode, ResamplerState};
pub use resampler::{Resampler, ResamplerEvent, ResamplerEventKind};
