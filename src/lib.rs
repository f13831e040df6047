//! Retinal live inference client
//!
//! This crate submits retinal (fundus) images to a remote diabetic
//! retinopathy classifier and renders the returned severity stage.
//!
//! # Architecture
//!
//! The live loop holds four guarantees by construction:
//!
//! 1. **Single owner**: the camera handle belongs to one `CameraResourceManager`
//!    and is released exactly once per acquisition, on stop or on drop.
//! 2. **Single flight**: at most one classification request is outstanding.
//! 3. **Ordered results**: a late completion never replaces a newer result.
//! 4. **Scoped results**: by default a result is only applied to the camera
//!    acquisition that produced its frame.
//!
//! # Module Structure
//!
//! - `camera`: camera lifecycle and video backends (synthetic, HTTP, V4L2)
//! - `frame`: JPEG encoding of the current live frame
//! - `inference`: remote classifier client and response normalization
//! - `live`: sampler, single-flight guard and the live session state machine
//! - `upload`: one-shot classification of an image file
//! - `stage`: stage catalogue rendered next to results
//! - `config`, `ui`: configuration loading and terminal presentation

pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod inference;
pub mod live;
pub mod stage;
pub mod ui;
pub mod upload;

pub use camera::{
    open_backend, CameraBackend, CameraResourceManager, CameraState, DeviceHandle, FacingMode,
    VideoDevice,
};
pub use config::RetinaConfig;
pub use error::{CameraError, ClassifyError, FrameError};
pub use frame::{CapturedFrame, FrameEncoder, DEFAULT_JPEG_QUALITY};
pub use inference::{
    Classification, Classifier, HttpClassifier, InferenceRequest, InferenceResult,
    DEFAULT_ENDPOINT,
};
pub use live::{
    Command, CommandSender, LiveSession, LiveSessionState, LiveSettings, ResultPolicy,
    SingleFlightGuard,
};
pub use stage::{RiskLevel, Stage, StageInfo};
pub use upload::{classify_file, UploadState, UPLOAD_FAILED_MESSAGE};
