use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Gate in front of every page request.
#[async_trait]
pub trait Pacer: Send {
    /// Resolve once the next request may be issued.
    async fn acquire(&mut self);
}

/// Token bucket pacer.
///
/// `qps` is the steady refill rate and `burst` the bucket capacity. The
/// bucket starts full, so the first `burst` permits are immediate. Waiting
/// callers borrow against future refill (the balance goes negative) so
/// back-to-back acquires stay evenly spaced.
#[derive(Debug)]
pub struct TokenBucket {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps,
            burst,
            tokens: burst,
            last: Instant::now(),
        }
    }

    /// One permit per `interval`; a zero interval never waits.
    pub fn every(interval: Duration) -> Self {
        let qps = if interval.is_zero() {
            f64::INFINITY
        } else {
            1.0 / interval.as_secs_f64()
        };
        Self::new(qps, 1)
    }

    /// Returns wait time needed to have `need` tokens available (0 if ready).
    fn needed_wait(&mut self, need: f64, now: Instant) -> Duration {
        if !(self.qps > 0.0) || self.qps.is_infinite() {
            self.last = now;
            return Duration::ZERO;
        }
        let dt = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + dt * self.qps).min(self.burst);
        self.tokens -= need;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }
}

#[async_trait]
impl Pacer for TokenBucket {
    async fn acquire(&mut self) {
        let wait = self.needed_wait(1.0, Instant::now());
        if !wait.is_zero() {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "pacer.wait");
            sleep(wait).await;
        }
    }
}
