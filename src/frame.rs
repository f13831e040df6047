//! Captured still frames.
//!
//! - `CapturedFrame`: one JPEG-encoded still taken from the live source. Owned
//!   by the tick that produced it and dropped after submission.
//! - `FrameEncoder`: renders the current live frame and encodes it.
//!
//! Frame bytes are zeroized on drop and `CapturedFrame` is not `Clone`.

use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use zeroize::Zeroize;

use crate::camera::VideoDevice;
use crate::error::FrameError;

/// JPEG quality used for live frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

pub struct CapturedFrame {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
    captured_at: Instant,
}

impl CapturedFrame {
    /// Wrap an already-encoded buffer. Dimensions must be non-zero.
    pub fn new(width: u32, height: u32, bytes: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::NotReady { width, height });
        }
        Ok(Self {
            width,
            height,
            bytes,
            captured_at: Instant::now(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print image content.
        f.debug_struct("CapturedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Drop for CapturedFrame {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Capture the device's current frame as a JPEG still.
    ///
    /// Fails with `FrameError::NotReady` while either native dimension is zero.
    pub fn encode(&self, device: &mut dyn VideoDevice) -> Result<CapturedFrame, FrameError> {
        let (width, height) = device.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::NotReady { width, height });
        }
        let mut image = device.read_frame()?;
        let (width, height) = image.dimensions();
        let mut bytes = Vec::with_capacity(capacity_hint(width, height));
        let encoded = JpegEncoder::new_with_quality(&mut bytes, self.quality).encode_image(&image);
        let pixels: &mut [u8] = &mut image;
        pixels.zeroize();
        encoded?;
        CapturedFrame::new(width, height, bytes)
    }
}

/// Rough JPEG size guess: a quarter byte per pixel.
fn capacity_hint(width: u32, height: u32) -> usize {
    (width as usize).saturating_mul(height as usize) / 4
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraBackend, FacingMode, SyntheticBackend};

    fn device(url: &str) -> Box<dyn VideoDevice> {
        let mut backend = SyntheticBackend::from_url(url).unwrap();
        backend.acquire(FacingMode::Environment).unwrap()
    }

    #[test]
    fn encodes_a_decodable_jpeg() {
        let mut device = device("stub://rear?width=64&height=48");
        let frame = FrameEncoder::default().encode(device.as_mut()).unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(&frame.bytes()[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(frame.bytes()).unwrap();
        assert_eq!(decoded.width(), 64);
    }

    #[test]
    fn zero_dimensions_are_not_ready() {
        let mut device = device("stub://rear?warmup=1");
        let err = FrameEncoder::default().encode(device.as_mut()).unwrap_err();
        assert!(matches!(err, FrameError::NotReady { width: 0, height: 0 }));
        assert!(FrameEncoder::default().encode(device.as_mut()).is_ok());
    }

    #[test]
    fn capacity_hint_handles_large_dimensions() {
        assert_eq!(capacity_hint(64, 48), 768);
        assert_eq!(capacity_hint(70_000, 70_000), 1_225_000_000);
        assert!(capacity_hint(u32::MAX, u32::MAX) > 0);
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(FrameEncoder::new(0).quality(), 1);
        assert_eq!(FrameEncoder::new(250).quality(), 100);
    }

    #[test]
    fn debug_output_hides_bytes() {
        let frame = CapturedFrame::new(2, 2, vec![1, 2, 3]).unwrap();
        let printed = format!("{:?}", frame);
        assert!(printed.contains("len: 3"));
    }

    #[test]
    fn rejects_empty_dimensions() {
        assert!(CapturedFrame::new(0, 10, Vec::new()).is_err());
    }
}
