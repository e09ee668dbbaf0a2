// Time source abstraction for the timer-driven state machines
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;
}

/// Monotonic clock backed by tokio's `Instant`, so paused-time tests advance it too.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_paused_time() {
        let clock = MonotonicClock::new();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 250);
    }
}
