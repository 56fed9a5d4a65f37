//! Per-source throttle gate.
//!
//! Each source owns one gate. Every outbound request of that source passes
//! through it, which serializes concurrent operations against the same
//! source while leaving other sources untouched.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Enforces a minimum delay between consecutive requests of one source.
///
/// The gate remembers when it last admitted a request. The lock is held
/// while waiting, so the timestamp is read and updated atomically with
/// respect to other waiters of the same source and the spacing is measured
/// from the moment a request was actually let through.
#[derive(Debug)]
pub struct ThrottleGate {
    source: String,
    wait_time: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl ThrottleGate {
    /// Create a gate for `source`. A zero `wait_time` disables throttling.
    pub fn new(source: impl Into<String>, wait_time: Duration) -> Self {
        Self {
            source: source.into(),
            wait_time,
            last_request: Mutex::new(None),
        }
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Wait until the next request may be issued, and claim that slot.
    pub async fn wait(&self) {
        if self.wait_time.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.wait_time;
            if ready_at > Instant::now() {
                tracing::trace!(source = %self.source, "throttled");
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_never_blocks() {
        let gate = ThrottleGate::new("fast", Duration::ZERO);
        let start = Instant::now();
        for _ in 0..20 {
            gate.wait().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let gate = ThrottleGate::new("slow", Duration::from_millis(500));
        let start = Instant::now();
        gate.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_are_spaced() {
        let wait = Duration::from_millis(40);
        let gate = Arc::new(ThrottleGate::new("slow", wait));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.wait().await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= wait, "gap {:?}", pair[1] - pair[0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_is_measured_from_last_request() {
        let wait = Duration::from_millis(100);
        let gate = ThrottleGate::new("slow", wait);

        gate.wait().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let start = Instant::now();
        gate.wait().await;
        assert_eq!(start.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_gates_do_not_wait_on_each_other() {
        let a = ThrottleGate::new("a", Duration::from_millis(200));
        let b = ThrottleGate::new("b", Duration::from_millis(200));

        let start = Instant::now();
        a.wait().await;
        b.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
