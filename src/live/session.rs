use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::guard::{FlightPermit, SingleFlightGuard};
use super::sampler::{DropReason, FrameSampler, SampleTick, SamplerStats, DEFAULT_TICK_INTERVAL};
use super::state::{LiveSessionState, ResultPolicy, SessionEvent, Transition};
use crate::camera::{CameraResourceManager, CameraState};
use crate::error::{ClassifyError, FrameError};
use crate::frame::{CapturedFrame, FrameEncoder, DEFAULT_JPEG_QUALITY};
use crate::inference::{Classifier, InferenceRequest, InferenceResult};

#[derive(Clone, Copy, Debug)]
pub struct LiveSettings {
    pub tick_interval: Duration,
    pub jpeg_quality: u8,
    pub result_policy: ResultPolicy,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            result_policy: ResultPolicy::default(),
        }
    }
}

/// Mutating calls the presentation layer may make.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    ToggleCamera,
    ClearResult,
    Shutdown,
}

struct Completion {
    epoch: u64,
    outcome: Result<InferenceResult, ClassifyError>,
    permit: FlightPermit,
}

enum LoopEvent {
    Command(Command),
    Completion(Completion),
}

/// Handle for issuing commands into a running session.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<LoopEvent>,
}

impl CommandSender {
    /// Returns false once the session has shut down.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(LoopEvent::Command(command)).is_ok()
    }

    pub fn toggle_camera(&self) -> bool {
        self.send(Command::ToggleCamera)
    }

    pub fn clear_result(&self) -> bool {
        self.send(Command::ClearResult)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Dispatched,
    Dropped(DropReason),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub sampler: SamplerStats,
    pub completed: u64,
    pub applied: u64,
    pub discarded: u64,
    pub failed: u64,
}

/// Live camera inference session.
///
/// All session state lives on the thread that drives the session (`run`, or
/// an embedder calling `step`). Classification runs on a short-lived worker
/// thread per request. The single-flight permit travels out with the request
/// and back with its completion, and is released on the driving thread only
/// after `busy` has been settled, so the guard and the published state flip
/// together.
pub struct LiveSession {
    camera: CameraResourceManager,
    encoder: FrameEncoder,
    classifier: Arc<dyn Classifier>,
    guard: SingleFlightGuard,
    sampler: FrameSampler,
    state: LiveSessionState,
    policy: ResultPolicy,
    events_tx: Sender<LoopEvent>,
    events_rx: Receiver<LoopEvent>,
    subscribers: Vec<Sender<LiveSessionState>>,
    stats: SessionStats,
}

impl LiveSession {
    pub fn new(
        camera: CameraResourceManager,
        classifier: Arc<dyn Classifier>,
        settings: LiveSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let mut state = LiveSessionState::default();
        state.apply(SessionEvent::Camera(camera.state()), settings.result_policy);
        Self {
            camera,
            encoder: FrameEncoder::new(settings.jpeg_quality),
            classifier,
            guard: SingleFlightGuard::new(),
            sampler: FrameSampler::new(settings.tick_interval, Instant::now()),
            state,
            policy: settings.result_policy,
            events_tx,
            events_rx,
            subscribers: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn commands(&self) -> CommandSender {
        CommandSender {
            tx: self.events_tx.clone(),
        }
    }

    /// Receive a snapshot after every state change, starting with the current one.
    pub fn subscribe(&mut self) -> Receiver<LiveSessionState> {
        let (tx, rx) = mpsc::channel();
        // The receiver is alive, so the first send cannot fail.
        let _ = tx.send(self.state.clone());
        self.subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> &LiveSessionState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    pub fn policy(&self) -> ResultPolicy {
        self.policy
    }

    pub fn camera(&self) -> &CameraResourceManager {
        &self.camera
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            sampler: self.sampler.stats(),
            ..self.stats
        }
    }

    /// When the sampler fires next.
    pub fn next_tick_at(&self) -> Instant {
        self.sampler.next_deadline()
    }

    pub fn toggle_camera(&mut self) {
        if self.camera.state() == CameraState::Off {
            self.start_camera();
        } else {
            self.stop_camera();
        }
    }

    pub fn clear_result(&mut self) {
        self.apply(SessionEvent::ResultCleared);
    }

    fn start_camera(&mut self) {
        let policy = self.policy;
        let state = &mut self.state;
        let subscribers = &mut self.subscribers;
        let started = self.camera.start_observed(|camera| {
            state.apply(SessionEvent::Camera(camera), policy);
            publish(subscribers, state);
        });
        match started {
            Ok(()) => self.sampler.restart(Instant::now()),
            // Non-fatal: the session stays off and the user may toggle again.
            Err(err) => log::warn!("live: {}", err),
        }
    }

    fn stop_camera(&mut self) {
        let policy = self.policy;
        let state = &mut self.state;
        let subscribers = &mut self.subscribers;
        self.camera.stop_observed(|camera| {
            state.apply(SessionEvent::Camera(camera), policy);
            publish(subscribers, state);
        });
        if self.guard.is_busy() {
            log::debug!("live: camera stopped with a request in flight; it will run to completion");
        }
    }

    /// Fire the sampler if its deadline has passed at `now`.
    pub fn step(&mut self, now: Instant) -> Option<TickOutcome> {
        let tick = self.sampler.poll(now)?;
        Some(self.handle_tick(tick))
    }

    /// Evaluate one tick: drop it, or capture a frame and submit it.
    pub fn handle_tick(&mut self, tick: SampleTick) -> TickOutcome {
        let outcome = self.try_dispatch();
        match outcome {
            TickOutcome::Dispatched => self.sampler.record_accepted(),
            TickOutcome::Dropped(reason) => self.sampler.record_drop(tick, reason),
        }
        outcome
    }

    fn try_dispatch(&mut self) -> TickOutcome {
        if !self.camera.is_on() {
            return TickOutcome::Dropped(DropReason::CameraOff);
        }
        let Some(permit) = self.guard.try_acquire() else {
            return TickOutcome::Dropped(DropReason::Busy);
        };
        let Some(device) = self.camera.device_mut() else {
            return TickOutcome::Dropped(DropReason::CameraOff);
        };
        let frame = match self.encoder.encode(device) {
            Ok(frame) => frame,
            Err(FrameError::NotReady { .. }) => {
                return TickOutcome::Dropped(DropReason::FrameNotReady)
            }
            Err(err) => {
                log::warn!("live: {}", err);
                return TickOutcome::Dropped(DropReason::CaptureFailed);
            }
        };
        self.dispatch(frame, permit);
        TickOutcome::Dispatched
    }

    fn dispatch(&mut self, frame: CapturedFrame, permit: FlightPermit) {
        let request = InferenceRequest::new(frame, self.state.epoch());
        log::debug!(
            "live: submitting {}x{} frame ({} bytes, epoch {})",
            request.frame.width(),
            request.frame.height(),
            request.frame.bytes().len(),
            request.epoch
        );
        let classifier = Arc::clone(&self.classifier);
        let events = self.events_tx.clone();
        self.apply(SessionEvent::RequestIssued);

        let spawned = thread::Builder::new()
            .name("retina-classify".to_string())
            .spawn(move || {
                let epoch = request.epoch;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(&request)))
                    .unwrap_or_else(|_| Err(ClassifyError::WorkerPanicked));
                drop(request);
                // If the session is gone the permit is dropped with the message.
                let _ = events.send(LoopEvent::Completion(Completion {
                    epoch,
                    outcome,
                    permit,
                }));
            });
        if let Err(err) = spawned {
            // The closure (and the permit inside it) was dropped with the error.
            log::error!("live: failed to spawn classification worker: {}", err);
            self.stats.failed += 1;
            self.apply(SessionEvent::RequestFailed);
        }
    }

    /// Apply every event already queued without blocking. Returns false once
    /// a shutdown command has been seen.
    pub fn process_pending(&mut self) -> bool {
        while let Ok(event) = self.events_rx.try_recv() {
            if !self.handle_event(event) {
                return false;
            }
        }
        true
    }

    /// Block until one classification completion has been applied, handling
    /// commands that arrive meanwhile. Returns false on timeout or shutdown.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.events_rx.recv_timeout(wait) {
                Ok(LoopEvent::Completion(completion)) => {
                    self.on_completion(completion);
                    return true;
                }
                Ok(event) => {
                    if !self.handle_event(event) {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    /// Drive the session until a shutdown command arrives.
    pub fn run(mut self) -> SessionStats {
        log::info!(
            "live: session running (interval={}ms, policy={})",
            self.sampler.interval().as_millis(),
            self.policy
        );
        loop {
            // Completions already queued settle before the next tick is judged.
            if !self.process_pending() {
                break;
            }
            if let Some(tick) = self.sampler.poll(Instant::now()) {
                self.handle_tick(tick);
            }
            let wait = self.sampler.time_until_next(Instant::now());
            match self.events_rx.recv_timeout(wait) {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                // The session holds a sender itself, so this cannot happen.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.stop_camera();
        let stats = self.stats();
        log::info!(
            "live: session stopped (ticks={}, submitted={}, applied={}, failed={})",
            stats.sampler.ticks,
            stats.sampler.accepted,
            stats.applied,
            stats.failed
        );
        stats
    }

    fn handle_event(&mut self, event: LoopEvent) -> bool {
        match event {
            LoopEvent::Command(Command::ToggleCamera) => self.toggle_camera(),
            LoopEvent::Command(Command::ClearResult) => self.clear_result(),
            LoopEvent::Command(Command::Shutdown) => return false,
            LoopEvent::Completion(completion) => self.on_completion(completion),
        }
        true
    }

    fn on_completion(&mut self, completion: Completion) {
        let Completion {
            epoch,
            outcome,
            permit,
        } = completion;
        self.stats.completed += 1;
        match outcome {
            Ok(result) => {
                let transition = self.apply(SessionEvent::RequestCompleted { epoch, result });
                if let Transition::Discarded(reason) = transition {
                    self.stats.discarded += 1;
                    log::debug!("live: result {} discarded ({:?})", result.stage, reason);
                } else {
                    self.stats.applied += 1;
                    log::info!(
                        "live: {} ({:.1}%)",
                        result.stage.info().label,
                        result.percent()
                    );
                }
            }
            Err(err) => {
                // Previous result stays on screen; no user-visible error.
                self.stats.failed += 1;
                log::warn!("live: classification failed: {}", err);
                self.apply(SessionEvent::RequestFailed);
            }
        }
        drop(permit);
    }

    fn apply(&mut self, event: SessionEvent) -> Transition {
        let before = self.state.clone();
        let transition = self.state.apply(event, self.policy);
        if self.state != before {
            publish(&mut self.subscribers, &self.state);
        }
        transition
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.stop_camera();
    }
}

fn publish(subscribers: &mut Vec<Sender<LiveSessionState>>, state: &LiveSessionState) {
    subscribers.retain(|tx| tx.send(state.clone()).is_ok());
}
