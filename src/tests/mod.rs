//! Integration testing module
//!
//! End-to-end tests for the transcoding pipeline:
//! - source to WAV container, checked with an independent parser
//! - resampling inside the pipeline against the bare kernel
//! - the lossy backend in streaming mode
//! - configuration files driving a pipeline

pub mod e2e;
