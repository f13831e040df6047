//! Continuous live-camera inference.
//!
//! A `LiveSession` samples the camera on a fixed period, keeps at most one
//! classification in flight, and folds completions into `LiveSessionState`.

pub mod guard;
pub mod sampler;
pub mod session;
pub mod state;

pub use guard::{FlightPermit, SingleFlightGuard};
pub use sampler::{DropReason, FrameSampler, SampleTick, SamplerStats, DEFAULT_TICK_INTERVAL};
pub use session::{Command, CommandSender, LiveSession, LiveSettings, SessionStats, TickOutcome};
pub use state::{DiscardReason, LiveSessionState, ResultPolicy, SessionEvent, Transition};
