use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Request pacing for one backend, shared by every concurrent query that
/// goes through it.
///
/// `acquire` hands out one request slot per `min_interval`; callers reserve
/// a slot under the lock and wait outside it. `settle` is the fixed delay a
/// backend observes after each call.
#[derive(Debug)]
pub struct Pacing {
    min_interval: Duration,
    settle: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacing {
    pub fn new(min_interval: Duration, settle: Duration) -> Self {
        Self {
            min_interval,
            settle,
            next_slot: Mutex::new(None),
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let wait = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot - now
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn settle(&self) {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
    }
}
