// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded polling. Every wait during acquisition goes through here.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Default interval between checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long to poll and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollBudget {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// The check never produced a value before the budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("condition not met within {0:?}")]
pub struct PollTimeout(pub Duration);

/// Roughly 30 years from now; stands in for deadlines that overflow `Instant`.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

/// Evaluate `check` until it yields `Some`, or the budget elapses.
///
/// The check runs at least once, and once more at the deadline, so a
/// condition that becomes true during the final sleep is still seen.
pub async fn poll_until<T, F, Fut>(budget: PollBudget, mut check: F) -> Result<T, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now()
        .checked_add(budget.timeout)
        .unwrap_or_else(far_future);
    loop {
        if let Some(value) = check().await {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout(budget.timeout));
        }
        let nap = budget.interval.min(deadline - now);
        tokio::time::sleep(nap).await;
    }
}
