//! Bounded polling for asynchronous assistant jobs.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use pagecast_shared::{PagecastError, PollConfig};

/// One status check.
#[derive(Debug)]
pub enum Check<T> {
    /// The job reached a state the caller is waiting for.
    Ready(T),
    /// Still running; carries the status reported.
    Pending(String),
}

/// How a bounded wait ended.
#[derive(Debug)]
pub enum PollResult<T> {
    Ready(T),
    /// Every attempt reported pending.
    TimedOut { last_status: String, attempts: usize },
    /// A status check itself failed. Polling stops at the first failure.
    Failed(PagecastError),
}

enum Attempt {
    Pending(String),
    Service(PagecastError),
}

/// Maximum attempts and delay schedule for one wait.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Retries after the first check.
    pub max_attempts: usize,
    pub interval: Duration,
    /// When set, delays double from `interval` up to this cap.
    pub max_interval: Option<Duration>,
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            interval: Duration::from_millis(config.interval_ms),
            max_interval: config.max_interval_ms.map(Duration::from_millis),
        }
    }
}

impl PollPolicy {
    pub fn fixed(max_attempts: usize, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            max_interval: None,
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.interval)
            .with_max_times(self.max_attempts);
        match self.max_interval {
            Some(cap) => builder.with_factor(2.0).with_max_delay(cap.max(self.interval)),
            None => builder.with_factor(1.0).with_max_delay(self.interval),
        }
    }

    /// Call `check` until it is ready, it fails, or the attempts run out.
    pub async fn poll<T, F, Fut>(&self, what: &str, mut check: F) -> PollResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Check<T>, PagecastError>>,
    {
        let mut attempts = 0usize;
        let result = (|| {
            attempts += 1;
            let status = check();
            async move {
                match status.await {
                    Ok(Check::Ready(value)) => Ok(value),
                    Ok(Check::Pending(status)) => Err(Attempt::Pending(status)),
                    Err(e) => Err(Attempt::Service(e)),
                }
            }
        })
        .retry(self.backoff())
        .sleep(tokio::time::sleep)
        .when(|attempt| matches!(attempt, Attempt::Pending(_)))
        .notify(|attempt, delay: Duration| {
            if let Attempt::Pending(status) = attempt {
                debug!(what, status = %status, delay_ms = delay.as_millis(), "still pending");
            }
        })
        .await;

        match result {
            Ok(value) => PollResult::Ready(value),
            Err(Attempt::Pending(last_status)) => PollResult::TimedOut {
                last_status,
                attempts,
            },
            Err(Attempt::Service(e)) => PollResult::Failed(e),
        }
    }
}
