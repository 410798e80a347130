//! Bounded fixed-delay polling.
//!
//! A [`Waiter`] repeatedly runs a check until it reports success, sleeping
//! a fixed delay between attempts. It fails closed: once the attempts are
//! used up it returns [`WaitError::Exhausted`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::clock::Clock;
use crate::config::Settings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for {name} after {attempts} attempts")]
    Exhausted { name: String, attempts: u32 },
}

#[derive(Clone)]
pub struct Waiter {
    name: String,
    attempts: u32,
    delay: Duration,
    clock: Arc<dyn Clock>,
}

impl Waiter {
    pub fn new(name: impl Into<String>, attempts: u32, delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            attempts: attempts.max(1),
            delay,
            clock,
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        Self::new(name, settings.waiter_attempts, settings.waiter_delay, clock)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `check` until it returns `Ok(true)`.
    ///
    /// Errors from `check` abort the wait immediately.
    pub async fn wait<F, Fut, E>(&self, mut check: F) -> Result<(), E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: From<WaitError>,
    {
        for attempt in 1..=self.attempts {
            if check().await? {
                debug!(waiter = %self.name, attempt, "wait condition met");
                return Ok(());
            }

            if attempt < self.attempts {
                debug!(
                    waiter = %self.name,
                    attempt,
                    delay_ms = self.delay.as_millis() as u64,
                    "wait condition not met, retrying"
                );
                self.clock.sleep(self.delay).await;
            }
        }

        Err(WaitError::Exhausted {
            name: self.name.clone(),
            attempts: self.attempts,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn succeeds_once_condition_holds() {
        let clock = Arc::new(ManualClock::at_fixed_start());
        let waiter = Waiter::new("nodes", 5, Duration::from_secs(10), clock.clone());

        let mut calls = 0;
        let result: Result<(), WaitError> = waiter
            .wait(|| {
                calls += 1;
                let done = calls == 3;
                async move { Ok(done) }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls, 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10); 2]);
    }

    #[tokio::test]
    async fn exhausts_after_bounded_attempts() {
        let clock = Arc::new(ManualClock::at_fixed_start());
        let waiter = Waiter::new("nodes", 4, Duration::from_secs(5), clock.clone());

        let result: Result<(), WaitError> = waiter.wait(|| async { Ok(false) }).await;

        assert_eq!(
            result,
            Err(WaitError::Exhausted {
                name: "nodes".to_string(),
                attempts: 4
            })
        );
        // No sleep after the final attempt.
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn settings_bound_the_attempts() {
        let clock = Arc::new(ManualClock::at_fixed_start());
        let settings = Settings {
            waiter_attempts: 3,
            waiter_delay: Duration::from_secs(7),
            ..Settings::default()
        };
        let waiter = Waiter::from_settings("environment nodes", &settings, clock.clone());

        let result: Result<(), WaitError> = waiter.wait(|| async { Ok(false) }).await;

        assert_eq!(
            result,
            Err(WaitError::Exhausted {
                name: "environment nodes".to_string(),
                attempts: 3
            })
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(7); 2]);
    }

    #[tokio::test]
    async fn check_errors_abort_the_wait() {
        #[derive(Debug, PartialEq)]
        enum TestError {
            Boom,
            Wait,
        }
        impl From<WaitError> for TestError {
            fn from(_: WaitError) -> Self {
                TestError::Wait
            }
        }

        let clock = Arc::new(ManualClock::at_fixed_start());
        let waiter = Waiter::new("nodes", 10, Duration::from_secs(1), clock.clone());

        let result = waiter.wait(|| async { Err::<bool, _>(TestError::Boom) }).await;
        assert_eq!(result, Err(TestError::Boom));
        assert!(clock.sleeps().is_empty());
    }
}
