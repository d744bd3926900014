//! Per-requester submit throttle.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Enforces a minimum interval between submissions of the same requester.
///
/// Only successful checks start a new interval, so a rejected attempt does
/// not extend the wait.
pub struct SubmitThrottle {
    interval: Duration,
    last_submit: RwLock<HashMap<String, Instant>>,
}

impl SubmitThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_submit: RwLock::new(HashMap::new()),
        }
    }

    /// Records a submission for `requester`.
    ///
    /// Returns `Err(wait)` with the remaining time when the requester
    /// submitted too recently.
    pub async fn check(&self, requester: &str) -> Result<(), Duration> {
        if self.interval.is_zero() {
            return Ok(());
        }

        let now = Instant::now();
        let mut last_submit = self.last_submit.write().await;
        if let Some(last) = last_submit.get(requester) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.interval {
                return Err(self.interval - elapsed);
            }
        }
        last_submit.insert(requester.to_string(), now);
        Ok(())
    }

    /// Takes back the interval started by a successful [`check`](Self::check)
    /// whose submission was then refused.
    pub async fn refund(&self, requester: &str) {
        self.last_submit.write().await.remove(requester);
    }

    /// Drops entries whose interval has passed.
    pub async fn prune(&self) {
        let now = Instant::now();
        let interval = self.interval;
        self.last_submit
            .write()
            .await
            .retain(|_, last| now.duration_since(*last) < interval);
    }

    pub async fn tracked(&self) -> usize {
        self.last_submit.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_second_submit_rejected_within_interval() {
        let throttle = SubmitThrottle::new(Duration::from_secs(20));
        assert_ok!(throttle.check("alice").await);

        let wait = assert_err!(throttle.check("alice").await);
        assert!(wait <= Duration::from_secs(20));
        assert!(wait > Duration::from_secs(19));

        // Other requesters are independent.
        assert_ok!(throttle.check("bob").await);
    }

    #[tokio::test]
    async fn test_allowed_after_interval() {
        let throttle = SubmitThrottle::new(Duration::from_millis(30));
        assert_ok!(throttle.check("alice").await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_ok!(throttle.check("alice").await);
    }

    #[tokio::test]
    async fn test_zero_interval_disables() {
        let throttle = SubmitThrottle::new(Duration::ZERO);
        assert_ok!(throttle.check("alice").await);
        assert_ok!(throttle.check("alice").await);
        assert_eq!(throttle.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_refund_clears_the_interval() {
        let throttle = SubmitThrottle::new(Duration::from_secs(20));
        assert_ok!(throttle.check("alice").await);
        assert_err!(throttle.check("alice").await);

        throttle.refund("alice").await;
        assert_eq!(throttle.tracked().await, 0);
        assert_ok!(throttle.check("alice").await);
    }

    #[tokio::test]
    async fn test_prune_forgets_expired() {
        let throttle = SubmitThrottle::new(Duration::from_millis(30));
        throttle.check("alice").await.unwrap();
        throttle.check("bob").await.unwrap();
        assert_eq!(throttle.tracked().await, 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        throttle.prune().await;
        assert_eq!(throttle.tracked().await, 0);
    }
}
