//! Camera resource lifecycle.
//!
//! `CameraResourceManager` is the single owner of the hardware video handle.
//! The handle is an RAII `DeviceHandle`: dropping it stops every media track,
//! so release happens exactly once per acquisition whether the camera is
//! stopped explicitly, the owning session is torn down, or acquisition fails
//! half way.
//!
//! Backends are selected by source URL:
//! - `stub://<name>` synthetic source (always available)
//! - `http(s)://...` MJPEG stream or JPEG snapshot endpoint
//! - `/dev/videoN` or `v4l2:///dev/videoN` (feature: camera-v4l2)

pub mod http;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::error::{CameraError, FrameError};

pub use http::HttpCameraBackend;
pub use synthetic::{SyntheticBackend, SyntheticProbe};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Backend;

/// Lifecycle of the camera resource.
///
/// `Off -> Starting -> On`, `On -> Stopping -> Off`, `Starting -> Off` on
/// acquisition failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CameraState {
    #[default]
    Off,
    Starting,
    On,
    Stopping,
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CameraState::Off => "off",
            CameraState::Starting => "starting",
            CameraState::On => "on",
            CameraState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Which physical camera to prefer when a source exposes several.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FacingMode {
    /// Rear-facing ("environment") camera.
    #[default]
    Environment,
    /// Front-facing ("user") camera.
    User,
}

impl FromStr for FacingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "environment" | "rear" | "back" => Ok(FacingMode::Environment),
            "user" | "front" => Ok(FacingMode::User),
            other => Err(anyhow!(
                "unknown camera facing '{}'; expected environment or user",
                other
            )),
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::Environment => f.write_str("environment"),
            FacingMode::User => f.write_str("user"),
        }
    }
}

/// An acquired video device.
///
/// Implementations must make `stop_tracks` idempotent.
pub trait VideoDevice: Send {
    /// Human readable device label for logs.
    fn label(&self) -> &str;

    /// Native dimensions of the live stream. Zero while the source is not yet
    /// producing frames.
    fn dimensions(&self) -> (u32, u32);

    /// Render the current frame.
    fn read_frame(&mut self) -> Result<RgbImage, FrameError>;

    /// Number of media tracks still running.
    fn active_tracks(&self) -> usize;

    /// Stop every media track.
    fn stop_tracks(&mut self);
}

/// A source of video devices.
pub trait CameraBackend: Send {
    fn name(&self) -> &'static str;

    /// Request exclusive access to a video device.
    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn VideoDevice>, CameraError>;
}

/// Owned device handle. Releases the device tracks when dropped.
pub struct DeviceHandle {
    device: Box<dyn VideoDevice>,
    acquisition: u64,
}

impl DeviceHandle {
    fn new(device: Box<dyn VideoDevice>, acquisition: u64) -> Self {
        Self {
            device,
            acquisition,
        }
    }

    /// Monotonic acquisition number; a fresh acquisition always gets a new one.
    pub fn acquisition(&self) -> u64 {
        self.acquisition
    }

    pub fn device(&self) -> &dyn VideoDevice {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn VideoDevice {
        self.device.as_mut()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.device.stop_tracks();
        log::info!(
            "camera: released {} (acquisition #{})",
            self.device.label(),
            self.acquisition
        );
    }
}

/// Owns the camera lifecycle and the device handle.
///
/// Dropping the manager releases a held handle, so whoever owns the manager
/// owns the guaranteed release.
pub struct CameraResourceManager {
    backend: Box<dyn CameraBackend>,
    facing: FacingMode,
    state: CameraState,
    handle: Option<DeviceHandle>,
    acquisitions: u64,
}

impl CameraResourceManager {
    pub fn new(backend: Box<dyn CameraBackend>, facing: FacingMode) -> Self {
        Self {
            backend,
            facing,
            state: CameraState::Off,
            handle: None,
            acquisitions: 0,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.state == CameraState::On
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    /// Total successful acquisitions over the manager's lifetime.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    /// Acquisition number of the held handle, if any.
    pub fn current_acquisition(&self) -> Option<u64> {
        self.handle.as_ref().map(DeviceHandle::acquisition)
    }

    /// Accessor for the live device. The only path the encoder has to it.
    pub fn device_mut(&mut self) -> Option<&mut dyn VideoDevice> {
        match self.state {
            CameraState::On => self.handle.as_mut().map(DeviceHandle::device_mut),
            _ => None,
        }
    }

    pub fn start(&mut self) -> Result<(), CameraError> {
        self.start_observed(|_| {})
    }

    /// Acquire a device, reporting each state transition to `observe`.
    ///
    /// Starting while already on is a no-op.
    pub fn start_observed(
        &mut self,
        mut observe: impl FnMut(CameraState),
    ) -> Result<(), CameraError> {
        if self.state == CameraState::On {
            return Ok(());
        }
        // A leftover handle from an interrupted transition must not be reused.
        self.handle = None;

        self.set_state(CameraState::Starting, &mut observe);
        match self.backend.acquire(self.facing) {
            Ok(device) => {
                self.acquisitions += 1;
                log::info!(
                    "camera: acquired {} via {} (facing={}, acquisition #{})",
                    device.label(),
                    self.backend.name(),
                    self.facing,
                    self.acquisitions
                );
                self.handle = Some(DeviceHandle::new(device, self.acquisitions));
                self.set_state(CameraState::On, &mut observe);
                Ok(())
            }
            Err(err) => {
                self.set_state(CameraState::Off, &mut observe);
                Err(err)
            }
        }
    }

    pub fn stop(&mut self) {
        self.stop_observed(|_| {})
    }

    /// Release the held handle, if any. Idempotent.
    pub fn stop_observed(&mut self, mut observe: impl FnMut(CameraState)) {
        let Some(handle) = self.handle.take() else {
            if self.state != CameraState::Off {
                self.set_state(CameraState::Off, &mut observe);
            }
            return;
        };
        self.set_state(CameraState::Stopping, &mut observe);
        drop(handle);
        self.set_state(CameraState::Off, &mut observe);
    }

    fn set_state(&mut self, state: CameraState, observe: &mut impl FnMut(CameraState)) {
        if self.state != state {
            log::debug!("camera: {} -> {}", self.state, state);
            self.state = state;
            observe(state);
        }
    }
}

impl Drop for CameraResourceManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the backend for a camera source URL.
pub fn open_backend(source_url: &str) -> Result<Box<dyn CameraBackend>> {
    if source_url.starts_with("stub://") {
        return Ok(Box::new(SyntheticBackend::from_url(source_url)?));
    }
    if source_url.starts_with("http://") || source_url.starts_with("https://") {
        return Ok(Box::new(HttpCameraBackend::new(source_url)?));
    }
    if source_url.starts_with("/dev/video") || source_url.starts_with("v4l2://") {
        #[cfg(feature = "camera-v4l2")]
        {
            let device = source_url.trim_start_matches("v4l2://");
            return Ok(Box::new(V4l2Backend::new(device)));
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            return Err(anyhow!(
                "camera source '{}' requires the camera-v4l2 feature",
                source_url
            ));
        }
    }
    Err(anyhow!(
        "unsupported camera source '{}'; expected stub://, http(s):// or /dev/videoN",
        source_url
    ))
}
