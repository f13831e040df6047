use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-flight token for classification requests.
///
/// `try_acquire` is a compare-and-swap on one flag; the returned permit clears
/// the flag when dropped, including while unwinding, so a failed request can
/// never leave the guard locked. There is no queue: a caller that does not get
/// a permit simply does not start work.
#[derive(Clone, Debug, Default)]
pub struct SingleFlightGuard {
    busy: Arc<AtomicBool>,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self) -> Option<FlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Proof that the holder owns the single in-flight slot.
#[must_use = "dropping the permit releases the guard immediately"]
#[derive(Debug)]
pub struct FlightPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
