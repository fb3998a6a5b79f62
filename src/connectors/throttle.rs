//! Per-source courtesy throttle: a minimum delay between consecutive
//! requests to one upstream. Local to each connector, not a shared
//! scheduler. Holding the mutex across the sleep also serializes in-flight
//! requests for the source.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct Throttle {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Waits until at least `min_interval` has passed since the previous
    /// call, then marks the current instant as the last request time.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}
