//! Remote classification.
//!
//! The crate never analyses images itself: every classification is one
//! request to the remote service. `Classifier` is the seam the live loop and
//! the upload flow talk to; `HttpClassifier` is the production implementation.

mod client;
mod response;

use std::time::Instant;

use crate::error::ClassifyError;
use crate::frame::CapturedFrame;
use crate::stage::Stage;

pub use client::{HttpClassifier, DEFAULT_ENDPOINT};
pub use response::{normalize_confidence, parse_prediction};

/// One classification request. At most one is outstanding per live session.
#[derive(Debug)]
pub struct InferenceRequest {
    pub frame: CapturedFrame,
    pub issued_at: Instant,
    /// Session epoch at issuance; completions from older epochs are stale.
    pub epoch: u64,
}

impl InferenceRequest {
    pub fn new(frame: CapturedFrame, epoch: u64) -> Self {
        Self {
            frame,
            issued_at: Instant::now(),
            epoch,
        }
    }
}

/// Stage and normalized confidence as reported by the service.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    pub stage: Stage,
    /// Always within `[0, 1]`.
    pub confidence: f32,
}

/// A classification bound to the instant its frame was observed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InferenceResult {
    pub stage: Stage,
    pub confidence: f32,
    pub observed_at: Instant,
}

impl InferenceResult {
    pub fn new(classification: Classification, observed_at: Instant) -> Self {
        Self {
            stage: classification.stage,
            confidence: classification.confidence,
            observed_at,
        }
    }

    /// Confidence as a percentage, for display.
    pub fn percent(&self) -> f32 {
        self.confidence * 100.0
    }
}

/// Anything that can classify an encoded retinal image.
pub trait Classifier: Send + Sync {
    /// Classify raw image bytes as they would be uploaded.
    fn classify_image(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<Classification, ClassifyError>;

    /// Classify a live frame. The result is stamped with the request's
    /// issuance instant so late completions can be ordered.
    fn classify(&self, request: &InferenceRequest) -> Result<InferenceResult, ClassifyError> {
        let classification =
            self.classify_image(request.frame.bytes(), "frame.jpg", "image/jpeg")?;
        Ok(InferenceResult::new(classification, request.issued_at))
    }
}
