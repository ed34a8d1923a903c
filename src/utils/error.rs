//! Error types for the transcoder
//!
//! Every fallible operation in the crate returns [`TranscodeError`]. The job
//! boundary in the orchestrator is the only place errors are classified:
//! any error from a job the caller cancelled ends it as Cancelled, every
//! other error as Failed.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the transcoder
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// Demuxing or decoding errors
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// Video or image encoder errors
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Container writing errors
    #[error("Muxer error: {0}")]
    Muxer(String),

    /// GPU compositing errors
    #[error("Renderer error: {0}")]
    Renderer(String),

    /// Configuration errors (bad trim window, missing video track, unreadable overlay)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A pipeline ordering rule was broken, e.g. writing before the muxer started
    #[error("Pipeline invariant violated: {0}")]
    Invariant(String),

    /// No new decoded frame reached the GPU surface in time
    #[error("Timed out after {0:?} waiting for a decoded frame")]
    FrameTimeout(Duration),

    /// The job observed a cancel request
    #[error("Job cancelled")]
    Cancelled,

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ffmpeg_next::Error> for TranscodeError {
    fn from(err: ffmpeg_next::Error) -> Self {
        TranscodeError::Decoder(format!("FFmpeg error: {}", err))
    }
}

impl From<image::ImageError> for TranscodeError {
    fn from(err: image::ImageError) -> Self {
        TranscodeError::Config(format!("Overlay image unreadable: {}", err))
    }
}

impl TranscodeError {
    /// Create an invariant violation from string
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        TranscodeError::Invariant(msg.into())
    }

    /// True for the cooperative cancellation signal
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TranscodeError::Cancelled)
    }

    /// True for faults that only cost the current frame
    pub fn is_transient(&self) -> bool {
        matches!(self, TranscodeError::FrameTimeout(_))
    }
}

/// Convenience type alias for Results in the transcoder
pub type Result<T> = std::result::Result<T, TranscodeError>;

/// Extension trait for converting other errors to TranscodeError
pub trait IntoTranscodeError<T> {
    /// Convert this error into a TranscodeError with the given context
    fn decoder_err(self, context: &str) -> Result<T>;
    fn encoder_err(self, context: &str) -> Result<T>;
    fn muxer_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoTranscodeError<T> for std::result::Result<T, E> {
    fn decoder_err(self, context: &str) -> Result<T> {
        self.map_err(|e| TranscodeError::Decoder(format!("{}: {}", context, e)))
    }

    fn encoder_err(self, context: &str) -> Result<T> {
        self.map_err(|e| TranscodeError::Encoder(format!("{}: {}", context, e)))
    }

    fn muxer_err(self, context: &str) -> Result<T> {
        self.map_err(|e| TranscodeError::Muxer(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| TranscodeError::Config(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::TranscodeError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::TranscodeError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}
