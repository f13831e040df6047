//! V4L2 camera backend (feature: camera-v4l2).
//!
//! Opens a local device node, negotiates RGB24 and memory-maps a small ring of
//! capture buffers. Dropping the stream turns streaming off, which is how the
//! device's single video track is stopped.

use anyhow::Context;
use image::RgbImage;
use ouroboros::self_referencing;

use super::{CameraBackend, FacingMode, VideoDevice};
use crate::error::{CameraError, FrameError};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;

pub struct V4l2Backend {
    device: String,
}

impl V4l2Backend {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }
}

impl CameraBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn VideoDevice>, CameraError> {
        // V4L2 nodes do not describe which way they face; the node is chosen by path.
        log::debug!("v4l2: facing preference {} ignored for {}", facing, self.device);
        let device = V4l2Device::open(&self.device)
            .map_err(|err| CameraError::unavailable(&self.device, format!("{:#}", err)))?;
        Ok(Box::new(device))
    }
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Device {
    path: String,
    state: Option<V4l2State>,
    width: u32,
    height: u32,
}

impl V4l2Device {
    fn open(path: &str) -> anyhow::Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(path)
            .with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = DEFAULT_WIDTH;
        format.height = DEFAULT_HEIGHT;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            anyhow::bail!("v4l2 device {} does not support RGB24 capture", path);
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!("v4l2: opened {} ({}x{})", path, format.width, format.height);
        Ok(Self {
            path: path.to_string(),
            state: Some(state),
            width: format.width,
            height: format.height,
        })
    }
}

impl VideoDevice for V4l2Device {
    fn label(&self) -> &str {
        &self.path
    }

    fn dimensions(&self) -> (u32, u32) {
        match self.state {
            Some(_) => (self.width, self.height),
            None => (0, 0),
        }
    }

    fn read_frame(&mut self) -> Result<RgbImage, FrameError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or(FrameError::NoDevice)?;
        let bytes = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| FrameError::Capture(err.to_string()))?;
        let expected = (self.width * self.height * 3) as usize;
        if bytes.len() < expected {
            return Err(FrameError::Capture(format!(
                "short v4l2 buffer ({} of {} bytes)",
                bytes.len(),
                expected
            )));
        }
        RgbImage::from_raw(self.width, self.height, bytes[..expected].to_vec())
            .ok_or_else(|| FrameError::Capture("v4l2 buffer size mismatch".to_string()))
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.state.is_some())
    }

    fn stop_tracks(&mut self) {
        self.state = None;
    }
}
