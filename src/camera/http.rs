//! HTTP camera backend.
//!
//! Handles IP cameras and ESP32-CAM style boards that serve either an MJPEG
//! stream (`multipart/x-mixed-replace`) or a single JPEG per request. The
//! first frame is decoded during acquisition so the device reports its native
//! size as soon as it is on.
//!
//! MJPEG streams are drained on a reader thread that keeps only the newest
//! decoded frame, so a capture never returns a frame queued up in the socket
//! buffer. Every read is bounded by the frame timeout; a stalled camera turns
//! into a capture error instead of blocking the caller.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use url::Url;
use zeroize::Zeroize;

use super::{CameraBackend, FacingMode, VideoDevice};
use crate::error::{CameraError, FrameError};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest a single frame read may take before the camera counts as stalled.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(3);

pub struct HttpCameraBackend {
    url: String,
    agent: ureq::Agent,
    frame_timeout: Duration,
}

impl HttpCameraBackend {
    pub fn new(source_url: &str) -> Result<Self> {
        Self::with_timeout(source_url, DEFAULT_FRAME_TIMEOUT)
    }

    pub fn with_timeout(source_url: &str, frame_timeout: Duration) -> Result<Self> {
        let url = Url::parse(source_url).context("parse camera url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "http camera requires an http(s) url, got '{}'",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT.min(frame_timeout))
            .timeout_read(frame_timeout)
            .build();
        Ok(Self {
            url: source_url.to_string(),
            agent,
            frame_timeout,
        })
    }
}

impl CameraBackend for HttpCameraBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn acquire(&mut self, facing: FacingMode) -> Result<Box<dyn VideoDevice>, CameraError> {
        // Network cameras expose one fixed view; the preference is informational.
        log::debug!("http camera: facing preference {} ignored", facing);
        let device = HttpDevice::connect(self.agent.clone(), &self.url, self.frame_timeout)
            .map_err(|err| CameraError::unavailable(&self.url, format!("{:#}", err)))?;
        Ok(Box::new(device))
    }
}

enum HttpStream {
    Mjpeg(MjpegPump),
    Snapshot,
}

struct HttpDevice {
    url: String,
    agent: ureq::Agent,
    frame_timeout: Duration,
    stream: Option<HttpStream>,
    dimensions: (u32, u32),
    pending: Option<RgbImage>,
    frame_count: u64,
}

impl HttpDevice {
    fn connect(agent: ureq::Agent, url: &str, frame_timeout: Duration) -> Result<Self> {
        let response = agent
            .get(url)
            .call()
            .with_context(|| format!("connect to camera {}", url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let (stream, pending, dimensions) = if content_type.contains("multipart") {
            let mut mjpeg = MjpegStream::new(response.into_reader());
            let first = decode_jpeg(&mjpeg.read_next_jpeg()?)?;
            let dimensions = first.dimensions();
            (HttpStream::Mjpeg(MjpegPump::spawn(mjpeg, first)?), None, dimensions)
        } else {
            let first = decode_jpeg(&read_body(response)?)?;
            let dimensions = first.dimensions();
            (HttpStream::Snapshot, Some(first), dimensions)
        };
        Ok(Self {
            url: url.to_string(),
            agent,
            frame_timeout,
            stream: Some(stream),
            dimensions,
            pending,
            frame_count: 0,
        })
    }

    fn next_frame(&mut self) -> Result<RgbImage> {
        match self.stream.as_ref() {
            Some(HttpStream::Mjpeg(pump)) => pump.latest(),
            Some(HttpStream::Snapshot) => {
                decode_jpeg(&fetch_single_jpeg(&self.agent, &self.url, self.frame_timeout)?)
            }
            None => Err(anyhow!("http camera stopped")),
        }
    }
}

impl VideoDevice for HttpDevice {
    fn label(&self) -> &str {
        &self.url
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.stream.is_none() {
            return (0, 0);
        }
        self.dimensions
    }

    fn read_frame(&mut self) -> Result<RgbImage, FrameError> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => self
                .next_frame()
                .map_err(|err| FrameError::Capture(format!("{:#}", err)))?,
        };
        self.dimensions = frame.dimensions();
        self.frame_count += 1;
        Ok(frame)
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.stream.is_some())
    }

    fn stop_tracks(&mut self) {
        // The reader thread closes the connection once it sees the stop flag.
        if self.stream.take().is_some() {
            log::debug!("http camera: stopped after {} frame(s)", self.frame_count);
        }
        self.pending = None;
    }
}

#[derive(Default)]
struct LatestFrame {
    frame: Option<RgbImage>,
    failure: Option<String>,
}

/// Background reader for an MJPEG stream.
struct MjpegPump {
    latest: Arc<Mutex<LatestFrame>>,
    stop: Arc<AtomicBool>,
}

impl MjpegPump {
    fn spawn(stream: MjpegStream, first: RgbImage) -> Result<Self> {
        let latest = Arc::new(Mutex::new(LatestFrame {
            frame: Some(first),
            failure: None,
        }));
        let stop = Arc::new(AtomicBool::new(false));
        let slot = Arc::clone(&latest);
        let flag = Arc::clone(&stop);
        thread::Builder::new()
            .name("retina-mjpeg".to_string())
            .spawn(move || pump_frames(stream, &slot, &flag))
            .context("spawn mjpeg reader")?;
        Ok(Self { latest, stop })
    }

    /// Copy of the newest frame, or the error that ended the stream.
    fn latest(&self) -> Result<RgbImage> {
        let slot = self
            .latest
            .lock()
            .map_err(|_| anyhow!("mjpeg reader poisoned"))?;
        if let Some(failure) = &slot.failure {
            return Err(anyhow!("{}", failure));
        }
        slot.frame
            .clone()
            .ok_or_else(|| anyhow!("no mjpeg frame received"))
    }
}

impl Drop for MjpegPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn pump_frames(mut stream: MjpegStream, latest: &Mutex<LatestFrame>, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        let jpeg = match stream.read_next_jpeg() {
            Ok(jpeg) => jpeg,
            Err(err) => {
                if !stop.load(Ordering::Acquire) {
                    log::warn!("http camera: {:#}", err);
                }
                if let Ok(mut slot) = latest.lock() {
                    slot.failure = Some(format!("{:#}", err));
                }
                return;
            }
        };
        let frame = match decode_jpeg(&jpeg) {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("http camera: skipping frame: {:#}", err);
                continue;
            }
        };
        let Ok(mut slot) = latest.lock() else { return };
        if let Some(mut old) = slot.frame.replace(frame) {
            let pixels: &mut [u8] = &mut old;
            pixels.zeroize();
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn read_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .timeout(timeout)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    read_body(response)
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    fn tiny_jpeg() -> Vec<u8> {
        colored_jpeg([120, 40, 10])
    }

    fn colored_jpeg(rgb: [u8; 3]) -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 6, image::Rgb(rgb));
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80)
            .encode_image(&image)
            .unwrap();
        out
    }

    fn accept_request(listener: &TcpListener) -> TcpStream {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 1024];
        let _ = stream.read(&mut request).unwrap();
        stream
    }

    fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
        let mut part = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        part.extend_from_slice(jpeg);
        part.extend_from_slice(b"\r\n");
        part
    }

    const MJPEG_HEADER: &str = "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nConnection: close\r\n\r\n";

    #[test]
    fn finds_jpeg_bounds_inside_noise() {
        let mut buffer = vec![0x00, 0x11];
        buffer.extend_from_slice(&[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        buffer.extend_from_slice(&[0x33]);
        assert_eq!(find_jpeg_bounds(&buffer), Some((2, 8)));
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00]), None);
    }

    #[test]
    fn mjpeg_stream_yields_consecutive_frames() {
        let jpeg = tiny_jpeg();
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));
        assert_eq!(stream.read_next_jpeg().unwrap(), jpeg);
        assert_eq!(stream.read_next_jpeg().unwrap(), jpeg);
        assert!(stream.read_next_jpeg().is_err());
    }

    #[test]
    fn snapshot_camera_reports_native_size() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let jpeg = tiny_jpeg();
        let server = thread::spawn(move || {
            // One response for the acquisition probe.
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).unwrap();
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                jpeg.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&jpeg).unwrap();
        });

        let mut backend = HttpCameraBackend::new(&format!("http://{}/capture", addr)).unwrap();
        let mut device = backend.acquire(FacingMode::Environment).unwrap();
        assert_eq!(device.dimensions(), (8, 6));
        assert_eq!(device.read_frame().unwrap().dimensions(), (8, 6));
        device.stop_tracks();
        assert_eq!(device.active_tracks(), 0);
        assert_eq!(device.dimensions(), (0, 0));
        server.join().unwrap();
    }

    #[test]
    fn stalled_snapshot_camera_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let jpeg = tiny_jpeg();
        let (release, hold) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let mut stream = accept_request(&listener);
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                jpeg.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&jpeg).unwrap();
            drop(stream);
            // Second request is read but never answered.
            let _stalled = accept_request(&listener);
            let _ = hold.recv();
        });

        let url = format!("http://{}/capture", addr);
        let mut backend =
            HttpCameraBackend::with_timeout(&url, Duration::from_millis(300)).unwrap();
        let mut device = backend.acquire(FacingMode::Environment).unwrap();
        assert!(device.read_frame().is_ok());

        let started = Instant::now();
        let err = device.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Capture(_)));
        assert!(started.elapsed() < Duration::from_secs(3));

        release.send(()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn stalled_mjpeg_stream_becomes_a_capture_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let jpeg = tiny_jpeg();
        let (release, hold) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let mut stream = accept_request(&listener);
            stream.write_all(MJPEG_HEADER.as_bytes()).unwrap();
            stream.write_all(&mjpeg_part(&jpeg)).unwrap();
            let _ = hold.recv();
        });

        let url = format!("http://{}/stream", addr);
        let mut backend =
            HttpCameraBackend::with_timeout(&url, Duration::from_millis(200)).unwrap();
        let mut device = backend.acquire(FacingMode::Environment).unwrap();
        assert_eq!(device.dimensions(), (8, 6));
        assert!(device.read_frame().is_ok());

        let deadline = Instant::now() + Duration::from_secs(3);
        let err = loop {
            match device.read_frame() {
                Err(err) => break err,
                Ok(_) => {
                    assert!(Instant::now() < deadline, "stalled stream never failed");
                    thread::sleep(Duration::from_millis(20));
                }
            }
        };
        assert!(matches!(err, FrameError::Capture(_)));

        device.stop_tracks();
        assert_eq!(device.active_tracks(), 0);
        release.send(()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn mjpeg_read_returns_the_newest_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (release, hold) = mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let mut stream = accept_request(&listener);
            stream.write_all(MJPEG_HEADER.as_bytes()).unwrap();
            stream
                .write_all(&mjpeg_part(&colored_jpeg([250, 0, 0])))
                .unwrap();
            thread::sleep(Duration::from_millis(100));
            for rgb in [[0, 250, 0], [0, 250, 0], [0, 0, 250]] {
                stream.write_all(&mjpeg_part(&colored_jpeg(rgb))).unwrap();
            }
            let _ = hold.recv();
        });

        let url = format!("http://{}/stream", addr);
        let mut backend = HttpCameraBackend::with_timeout(&url, Duration::from_secs(2)).unwrap();
        let mut device = backend.acquire(FacingMode::Environment).unwrap();
        thread::sleep(Duration::from_millis(400));

        let frame = device.read_frame().unwrap();
        let image::Rgb([r, g, b]) = *frame.get_pixel(4, 3);
        assert!(b > 200 && r < 60 && g < 60, "got ({}, {}, {})", r, g, b);

        device.stop_tracks();
        release.send(()).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn unreachable_camera_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut backend = HttpCameraBackend::new(&format!("http://{}/capture", addr)).unwrap();
        let err = backend.acquire(FacingMode::Environment).err().unwrap();
        assert!(matches!(err, CameraError::Unavailable { .. }));
    }
}
