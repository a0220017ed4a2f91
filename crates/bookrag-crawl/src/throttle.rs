//! Minimum spacing between requests to the source host.
//!
//! One shared value serializes discovery and extraction fetches: the
//! lock is held through the sleep, so concurrent workers queue up
//! behind it instead of bursting.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct FetchThrottle {
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl FetchThrottle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until at least `delay` has passed since the previous fetch.
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
