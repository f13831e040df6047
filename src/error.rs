//! Typed failures at the component seams of the live loop.
//!
//! None of these is fatal to a live session: the loop logs them and moves on
//! to the next tick.

use thiserror::Error;

/// Camera permission or hardware failure during acquisition.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera unavailable ({source_url}): {reason}")]
    Unavailable { source_url: String, reason: String },
}

impl CameraError {
    pub fn unavailable(source_url: &str, err: impl std::fmt::Display) -> Self {
        CameraError::Unavailable {
            source_url: source_url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    /// The source is not producing frames yet (zero native dimensions).
    #[error("frame source not ready ({width}x{height})")]
    NotReady { width: u32, height: u32 },
    #[error("camera is not on")]
    NoDevice,
    #[error("frame capture failed: {0}")]
    Capture(String),
    #[error("frame encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Every variant is a `ClassificationFailed` condition; the split only keeps
/// the log line useful.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classification request failed: {0}")]
    Transport(String),
    #[error("classifier returned HTTP {status}")]
    Status { status: u16 },
    #[error("invalid classifier response: {0}")]
    InvalidResponse(String),
    #[error("unknown stage identifier '{0}'")]
    UnknownStage(String),
    #[error("classification worker panicked")]
    WorkerPanicked,
}
