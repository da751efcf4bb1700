use thiserror::Error;

/// Main error type for the transcoding pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscodeError {
    /// Invalid construction parameters (rate, channels, bit depth, chunk size)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The source and the encoder disagree on the channel count
    #[error("Channel mismatch: source has {source_channels}, encoder expects {encoder_channels}")]
    ChannelMismatch {
        source_channels: usize,
        encoder_channels: usize,
    },

    /// The execution context was destroyed before or while serving the request
    #[error("Worker terminated")]
    Terminated,

    /// The pipeline was already finished and has not been reset since
    #[error("Pipeline already flushed")]
    Flushed,

    /// Failure of the execution context itself, attributed to the oldest
    /// pending request
    #[error("Transport error: {0}")]
    Transport(String),

    /// Failure reported by a codec backend while handling a request
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TranscodeError>;
