use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::camera::CameraState;
use crate::inference::Classification;
use crate::live::LiveSessionState;
use crate::stage::Stage;
use crate::upload::UploadState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = spinner();
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    pub fn live_view(&self) -> LiveView {
        LiveView {
            pretty: self.use_pretty(),
            pulse: None,
            last: None,
        }
    }
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Renders live session snapshots to the terminal.
///
/// Only prints when the rendered text changes; the busy flag drives a spinner
/// in pretty mode and a plain marker otherwise.
pub struct LiveView {
    pretty: bool,
    pulse: Option<ProgressBar>,
    last: Option<String>,
}

impl LiveView {
    pub fn render(&mut self, state: &LiveSessionState) {
        if self.pretty {
            self.update_pulse(state);
        }
        let text = describe_live(state);
        if self.last.as_deref() == Some(text.as_str()) {
            return;
        }
        match &self.pulse {
            Some(pulse) => pulse.println(&text),
            None => eprintln!("{text}"),
        }
        self.last = Some(text);
    }

    fn update_pulse(&mut self, state: &LiveSessionState) {
        match (&self.pulse, state.is_busy()) {
            (None, true) => {
                let pulse = spinner();
                pulse.set_message("analyzing frame…");
                self.pulse = Some(pulse);
            }
            (Some(pulse), false) => {
                pulse.finish_and_clear();
                self.pulse = None;
            }
            _ => {}
        }
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        if let Some(pulse) = self.pulse.take() {
            pulse.finish_and_clear();
        }
    }
}

/// One status line per snapshot, plus the result block when present.
pub fn describe_live(state: &LiveSessionState) -> String {
    let camera = match state.camera() {
        CameraState::Off => "camera off",
        CameraState::Starting => "camera starting",
        CameraState::On => "camera live",
        CameraState::Stopping => "camera stopping",
    };
    let mut out = String::from(camera);
    if state.is_busy() && state.is_camera_on() {
        out.push_str(" · analyzing");
    }
    match state.last_result() {
        Some(result) => {
            out.push('\n');
            out.push_str(&describe_stage(result.stage, result.confidence));
        }
        None if state.is_camera_on() => out.push_str("\n  waiting for first result"),
        None => {}
    }
    out
}

pub fn describe_upload(state: &UploadState) -> String {
    if state.is_loading() {
        return "analyzing image…".to_string();
    }
    if let Some(error) = state.error() {
        return format!("error: {error}");
    }
    match state.result() {
        Some(Classification { stage, confidence }) => describe_stage(*stage, *confidence),
        None => "no image analyzed".to_string(),
    }
}

fn describe_stage(stage: Stage, confidence: f32) -> String {
    let info = stage.info();
    format!(
        "  {} ({:.1}% confidence)\n  risk: {}\n  {}\n  next step: {}",
        info.label,
        confidence * 100.0,
        info.risk,
        info.description,
        info.action
    )
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
