use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::camera::CameraState;
use crate::inference::InferenceResult;

/// How completed classifications are reconciled with the current session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResultPolicy {
    /// Apply a result only while the camera is on and still in the epoch the
    /// request was issued in.
    #[default]
    EpochGated,
    /// Apply every result regardless of camera state; results may appear
    /// after the camera was stopped.
    Legacy,
}

impl FromStr for ResultPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "epoch-gated" | "epoch_gated" | "gated" => Ok(ResultPolicy::EpochGated),
            "legacy" => Ok(ResultPolicy::Legacy),
            other => Err(anyhow!(
                "unknown result policy '{}'; expected epoch-gated or legacy",
                other
            )),
        }
    }
}

impl fmt::Display for ResultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultPolicy::EpochGated => f.write_str("epoch-gated"),
            ResultPolicy::Legacy => f.write_str("legacy"),
        }
    }
}

/// Inputs to the live session state machine.
#[derive(Clone, Copy, Debug)]
pub enum SessionEvent {
    Camera(CameraState),
    RequestIssued,
    RequestCompleted { epoch: u64, result: InferenceResult },
    RequestFailed,
    ResultCleared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    /// Issued under an earlier camera acquisition.
    StaleEpoch,
    /// Camera is no longer on.
    CameraOff,
    /// Older than the result already shown.
    OutOfOrder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Changed,
    Unchanged,
    Discarded(DiscardReason),
}

/// Observable state of a live session.
///
/// The presentation layer only ever holds snapshots of this; every mutation
/// goes through [`LiveSessionState::apply`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveSessionState {
    camera: CameraState,
    last_result: Option<InferenceResult>,
    busy: bool,
    epoch: u64,
}

impl LiveSessionState {
    pub fn camera(&self) -> CameraState {
        self.camera
    }

    pub fn is_camera_on(&self) -> bool {
        self.camera == CameraState::On
    }

    pub fn last_result(&self) -> Option<&InferenceResult> {
        self.last_result.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Camera acquisition epoch; bumped every time the camera turns on.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// State transition function.
    pub fn apply(&mut self, event: SessionEvent, policy: ResultPolicy) -> Transition {
        match event {
            SessionEvent::Camera(state) => {
                if self.camera == state {
                    return Transition::Unchanged;
                }
                if state == CameraState::On {
                    self.epoch += 1;
                }
                self.camera = state;
                Transition::Changed
            }
            SessionEvent::RequestIssued => {
                self.busy = true;
                Transition::Changed
            }
            SessionEvent::RequestFailed => {
                // Previous result is kept as-is.
                self.settle()
            }
            SessionEvent::RequestCompleted { epoch, result } => {
                self.settle();
                if let Some(reason) = self.discard_reason(epoch, &result, policy) {
                    return Transition::Discarded(reason);
                }
                self.last_result = Some(result);
                Transition::Changed
            }
            SessionEvent::ResultCleared => {
                if self.last_result.take().is_some() {
                    Transition::Changed
                } else {
                    Transition::Unchanged
                }
            }
        }
    }

    fn settle(&mut self) -> Transition {
        if std::mem::replace(&mut self.busy, false) {
            Transition::Changed
        } else {
            Transition::Unchanged
        }
    }

    fn discard_reason(
        &self,
        epoch: u64,
        result: &InferenceResult,
        policy: ResultPolicy,
    ) -> Option<DiscardReason> {
        if policy == ResultPolicy::EpochGated {
            if epoch != self.epoch {
                return Some(DiscardReason::StaleEpoch);
            }
            if self.camera != CameraState::On {
                return Some(DiscardReason::CameraOff);
            }
        }
        match &self.last_result {
            Some(current) if result.observed_at < current.observed_at => {
                Some(DiscardReason::OutOfOrder)
            }
            _ => None,
        }
    }
}
