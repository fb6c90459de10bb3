//! Progress/status reporting sink, implemented by whatever hosts this
//! engine (the CLI, a plugin runtime, a test harness).

/// Coarse phase reported at each major state transition during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    DeviceRestart,
    DeviceErase,
    DeviceWrite,
    DeviceVerify,
    DeviceRead,
}

/// Sink for progress/status reporting. Every method has a no-op default so
/// callers only need to implement what they care about.
pub trait Progress {
    fn set_phase(&mut self, phase: Phase) {
        let _ = phase;
    }

    fn set_progress(&mut self, done: u64, total: u64) {
        let _ = (done, total);
    }
}

/// A [`Progress`] sink that discards everything, for callers that don't
/// want to watch.
#[derive(Debug, Default)]
pub struct NullProgress;

impl Progress for NullProgress {}
