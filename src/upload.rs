//! One-shot classification of an image file.

use std::path::Path;

use image::ImageFormat;
use zeroize::Zeroizing;

use crate::error::ClassifyError;
use crate::inference::{Classification, Classifier};

/// Message shown to the user when an upload cannot be classified.
pub const UPLOAD_FAILED_MESSAGE: &str = "Failed to process image. Please try again.";

/// Observable state of the upload flow.
///
/// `result` and `error` are never both set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadState {
    loading: bool,
    result: Option<Classification>,
    error: Option<String>,
}

impl UploadState {
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn result(&self) -> Option<&Classification> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// A new submission clears the previous outcome.
    pub fn begin(&mut self) {
        self.loading = true;
        self.result = None;
        self.error = None;
    }

    pub fn succeed(&mut self, classification: Classification) {
        self.loading = false;
        self.result = Some(classification);
        self.error = None;
    }

    pub fn fail(&mut self) {
        self.loading = false;
        self.result = None;
        self.error = Some(UPLOAD_FAILED_MESSAGE.to_string());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a supported image")]
    NotAnImage { path: String },
    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

/// Classify one image file and fold the outcome into an `UploadState`.
pub fn classify_file(classifier: &dyn Classifier, path: &Path) -> UploadState {
    let mut state = UploadState::default();
    state.begin();
    match try_classify_file(classifier, path) {
        Ok(classification) => {
            log::info!(
                "upload: {} classified as {} ({:.1}%)",
                path.display(),
                classification.stage,
                classification.confidence * 100.0
            );
            state.succeed(classification);
        }
        Err(err) => {
            log::warn!("upload: {}", err);
            state.fail();
        }
    }
    state
}

/// Same as [`classify_file`] but keeps the underlying error.
pub fn try_classify_file(
    classifier: &dyn Classifier,
    path: &Path,
) -> Result<Classification, UploadError> {
    let bytes = Zeroizing::new(std::fs::read(path).map_err(|source| UploadError::Read {
        path: path.display().to_string(),
        source,
    })?);
    let format = image::guess_format(&bytes).map_err(|_| UploadError::NotAnImage {
        path: path.display().to_string(),
    })?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload");
    Ok(classifier.classify_image(&bytes, filename, content_type(format))?)
}

fn content_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    }
}
