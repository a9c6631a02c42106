use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A token bucket shared by every worker hitting one endpoint family.
/// `acquire` sleeps until a token is available, so callers can simply
/// await it before each request.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_s: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_s: f64) -> TokenBucket {
        TokenBucket {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_s,
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_s).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.refill_per_s
            };
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_is_immediate() {
        let bucket = TokenBucket::new(3.0, 100.0);
        let start = std::time::Instant::now();
        for _ in 0..3 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(1.0, 10.0);
        bucket.acquire().await;
        let start = Instant::now();
        bucket.acquire().await;
        // One token at 10/s is 100ms away.
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
