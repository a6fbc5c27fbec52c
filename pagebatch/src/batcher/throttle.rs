//! Central request pacing shared by all outbound calls of a batcher.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between the starts of outbound calls
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// A throttle that never waits
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait for this caller's slot.
    ///
    /// Slots are handed out in lock order, so concurrent callers are spaced
    /// `interval` apart even though they sleep independently.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
