use std::time::{Duration, SystemTime};

/// A timed suspension.
///
/// Every pause in the pipeline (pacing between messages, the wait between cycles, and the delay between connection
/// attempts) goes through this trait, so that embedders and tests can observe or simulate them.
pub trait Sleep {
    /// Suspends for the given duration.
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

impl<S: Sleep + ?Sized> Sleep for Box<S> {
    fn sleep(&mut self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Returns the current wall-clock time in nanoseconds since the Unix epoch.
///
/// A clock set before the epoch yields zero.
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
