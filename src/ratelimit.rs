use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};

/// Keeps consecutive requests at least `delay` apart.
pub struct RateLimiter {
    between_requests: Option<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    /// A zero delay disables limiting.
    pub fn new(delay: Duration) -> Self {
        let between_requests = Quota::with_period(delay).map(GovernorRateLimiter::direct);
        RateLimiter { between_requests }
    }

    pub fn disabled() -> Self {
        RateLimiter {
            between_requests: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.between_requests.is_some()
    }

    pub async fn wait_until_ready(&self) {
        // The first call passes straight through; each later one waits out
        // whatever is left of the period since the previous call.
        if let Some(limiter) = &self.between_requests {
            limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn zero_delay_disables_the_limiter() {
        assert!(!RateLimiter::new(Duration::ZERO).is_enabled());
        assert!(RateLimiter::new(Duration::from_millis(5)).is_enabled());
    }

    #[tokio::test]
    async fn second_request_waits_for_the_period() {
        let limiter = RateLimiter::new(Duration::from_millis(50));
        let start = Instant::now();
        limiter.wait_until_ready().await;
        limiter.wait_until_ready().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
