use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Millisecond clock anchored at a wall-clock origin and advanced by tokio's
/// monotonic time, so paused-time tests control it with `tokio::time::advance`.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    origin_ms: u64,
    start: Instant,
}

impl Clock {
    pub fn system() -> Self {
        let origin_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Self::starting_at(origin_ms)
    }

    pub fn starting_at(origin_ms: u64) -> Self {
        Self {
            origin_ms,
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin_ms
            .saturating_add(self.start.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn follows_tokio_time() {
        let clock = Clock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1_250);
    }
}
