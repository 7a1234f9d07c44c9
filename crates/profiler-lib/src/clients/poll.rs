//! Long-poll loop shared by every remote collaborator
//!
//! A stage is submitted first, then its status endpoint is polled at a fixed
//! interval until it reports a terminal state or an error. The whole loop runs
//! under a deadline so it returns on time even if a request is still in flight.

use crate::error::{ClientError, ClientResult};
use crate::observability::ProfilerMetrics;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Interval and deadline of a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

impl PollConfig {
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    pub const fn from_secs(interval_secs: u64, deadline_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(interval_secs),
            Duration::from_secs(deadline_secs),
        )
    }
}

/// Outcome of a single poll attempt
#[derive(Debug)]
pub enum PollStatus<T> {
    Pending,
    Done(T),
}

/// Poll until `attempt` returns `Done`, an error, or the deadline elapses
pub async fn poll_until<T, F, Fut>(
    client: &'static str,
    what: &str,
    config: PollConfig,
    mut attempt: F,
) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<PollStatus<T>>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;

    let polling = async {
        loop {
            tokio::time::sleep(config.interval).await;
            attempts += 1;
            match attempt().await? {
                PollStatus::Done(value) => return Ok(value),
                PollStatus::Pending => {
                    debug!(client, what, attempts, "Stage still in progress");
                }
            }
        }
    };

    let result = match tokio::time::timeout(config.deadline, polling).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout {
            what: what.to_string(),
            secs: config.deadline.as_secs(),
        }),
    };

    ProfilerMetrics::new().observe_poll_duration(client, started.elapsed().as_secs_f64());
    result
}
