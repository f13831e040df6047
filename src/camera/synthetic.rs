//! Synthetic camera backend for `stub://` sources.
//!
//! Produces a fundus-like test pattern (dark field, orange retina disc, bright
//! optic disc drifting slowly between frames). Query parameters shape the
//! behaviour for tests and demos:
//!
//! - `deny=1` refuses acquisition, as a permission prompt would
//! - `warmup=N` reports zero dimensions for the first N dimension queries
//! - `width=W`, `height=H` set the native frame size (default 640x480)

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use url::Url;

use super::{CameraBackend, FacingMode, VideoDevice};
use crate::error::{CameraError, FrameError};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// Shared counters for observing synthetic devices from the outside.
#[derive(Clone, Debug, Default)]
pub struct SyntheticProbe {
    active_tracks: Arc<AtomicUsize>,
    acquisitions: Arc<AtomicU64>,
    releases: Arc<AtomicU64>,
    frames_read: Arc<AtomicU64>,
}

impl SyntheticProbe {
    pub fn active_tracks(&self) -> usize {
        self.active_tracks.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
struct SyntheticConfig {
    name: String,
    width: u32,
    height: u32,
    warmup: u32,
    deny: bool,
}

pub struct SyntheticBackend {
    config: SyntheticConfig,
    probe: SyntheticProbe,
}

impl SyntheticBackend {
    pub fn from_url(source_url: &str) -> Result<Self> {
        let url = Url::parse(source_url).with_context(|| format!("parse {}", source_url))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic camera requires a stub:// url"));
        }
        let mut config = SyntheticConfig {
            name: url.host_str().unwrap_or("camera").to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            warmup: 0,
            deny: false,
        };
        for (key, value) in url.query_pairs() {
            match &*key {
                "width" => config.width = parse_param(&key, &value)?,
                "height" => config.height = parse_param(&key, &value)?,
                "warmup" => config.warmup = parse_param(&key, &value)?,
                "deny" => config.deny = value != "0" && value != "false",
                other => log::warn!("synthetic camera: ignoring unknown parameter '{}'", other),
            }
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic camera dimensions must be non-zero"));
        }
        Ok(Self {
            config,
            probe: SyntheticProbe::default(),
        })
    }

    pub fn probe(&self) -> SyntheticProbe {
        self.probe.clone()
    }
}

fn parse_param(key: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| anyhow!("synthetic camera parameter '{}' must be an integer", key))
}

impl CameraBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn VideoDevice>, CameraError> {
        let source = format!("stub://{}", self.config.name);
        if self.config.deny {
            return Err(CameraError::unavailable(&source, "permission denied"));
        }
        self.probe.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.probe.active_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticDevice {
            label: format!("{} ({})", source, facing),
            config: self.config.clone(),
            probe: self.probe.clone(),
            warmup_left: Cell::new(self.config.warmup),
            live: true,
            frame_count: 0,
        }))
    }
}

struct SyntheticDevice {
    label: String,
    config: SyntheticConfig,
    probe: SyntheticProbe,
    warmup_left: Cell<u32>,
    live: bool,
    frame_count: u64,
}

impl VideoDevice for SyntheticDevice {
    fn label(&self) -> &str {
        &self.label
    }

    fn dimensions(&self) -> (u32, u32) {
        if !self.live {
            return (0, 0);
        }
        let left = self.warmup_left.get();
        if left > 0 {
            self.warmup_left.set(left - 1);
            return (0, 0);
        }
        (self.config.width, self.config.height)
    }

    fn read_frame(&mut self) -> Result<RgbImage, FrameError> {
        if !self.live {
            return Err(FrameError::Capture("synthetic track stopped".to_string()));
        }
        self.frame_count += 1;
        self.probe.frames_read.fetch_add(1, Ordering::SeqCst);
        Ok(fundus_pattern(
            self.config.width,
            self.config.height,
            self.frame_count,
        ))
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.live)
    }

    fn stop_tracks(&mut self) {
        if self.live {
            self.live = false;
            self.probe.active_tracks.fetch_sub(1, Ordering::SeqCst);
            self.probe.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

fn fundus_pattern(width: u32, height: u32, frame_count: u64) -> RgbImage {
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let radius = cx.min(cy) * 0.9;
    // Optic disc drifts a few pixels per frame to make consecutive frames differ.
    let drift = (frame_count % 32) as f32;
    let disc_x = cx + radius * 0.45 + drift;
    let disc_y = cy;
    let disc_r = radius * 0.15;

    RgbImage::from_fn(width, height, |x, y| {
        let (fx, fy) = (x as f32, y as f32);
        let d = ((fx - cx).powi(2) + (fy - cy).powi(2)).sqrt();
        if d > radius {
            return Rgb([0, 0, 0]);
        }
        let dd = ((fx - disc_x).powi(2) + (fy - disc_y).powi(2)).sqrt();
        if dd < disc_r {
            return Rgb([250, 220, 150]);
        }
        let falloff = 1.0 - (d / radius) * 0.6;
        Rgb([
            (200.0 * falloff) as u8,
            (90.0 * falloff) as u8,
            (30.0 * falloff) as u8,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_frames_at_configured_size() {
        let mut backend = SyntheticBackend::from_url("stub://rear?width=64&height=48").unwrap();
        let mut device = backend.acquire(FacingMode::Environment).unwrap();
        assert_eq!(device.dimensions(), (64, 48));
        let frame = device.read_frame().unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
    }

    #[test]
    fn warmup_reports_zero_dimensions() {
        let mut backend = SyntheticBackend::from_url("stub://rear?warmup=2").unwrap();
        let device = backend.acquire(FacingMode::Environment).unwrap();
        assert_eq!(device.dimensions(), (0, 0));
        assert_eq!(device.dimensions(), (0, 0));
        assert_eq!(device.dimensions(), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut backend = SyntheticBackend::from_url("stub://rear?width=64&height=48").unwrap();
        let mut device = backend.acquire(FacingMode::Environment).unwrap();
        let a = device.read_frame().unwrap();
        let b = device.read_frame().unwrap();
        assert_ne!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn stopped_device_has_no_tracks() {
        let mut backend = SyntheticBackend::from_url("stub://rear").unwrap();
        let probe = backend.probe();
        let mut device = backend.acquire(FacingMode::User).unwrap();
        device.stop_tracks();
        device.stop_tracks();
        assert_eq!(device.active_tracks(), 0);
        assert_eq!(probe.releases(), 1);
        assert!(device.read_frame().is_err());
        drop(device);
        assert_eq!(probe.releases(), 1);
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(SyntheticBackend::from_url("stub://rear?width=0").is_err());
    }
}
