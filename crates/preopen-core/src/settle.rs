//! Settle policies: how long to wait for client-side rendering that emits no
//! observable "done" event.
//!
//! Step logic only calls [`SettlePolicy::apply`]; swapping a fixed delay for
//! a predicate poll is a configuration change, not a code change.

use std::time::Duration;

use tokio::time::Instant;

use crate::traits::PageSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Return immediately.
    None,
    /// Sleep for a fixed duration.
    Fixed(Duration),
    /// Evaluate `script` every `interval` until it yields `true` or `max` elapses.
    Poll {
        script: String,
        interval: Duration,
        max: Duration,
    },
}

impl SettlePolicy {
    /// Fixed delay; a zero duration means no wait at all.
    pub fn fixed(delay: Duration) -> Self {
        if delay.is_zero() {
            SettlePolicy::None
        } else {
            SettlePolicy::Fixed(delay)
        }
    }

    /// Wait according to the policy. Never fails: a predicate that errors or
    /// never turns true just uses up the time budget.
    pub async fn apply<S: PageSession>(&self, session: &S) {
        match self {
            SettlePolicy::None => {}
            SettlePolicy::Fixed(delay) => {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Settling");
                tokio::time::sleep(*delay).await;
            }
            SettlePolicy::Poll {
                script,
                interval,
                max,
            } => {
                let deadline = Instant::now() + *max;
                loop {
                    match session.evaluate_predicate(script).await {
                        Ok(true) => {
                            tracing::debug!("Settle predicate satisfied");
                            return;
                        }
                        Ok(false) => {}
                        Err(e) => tracing::debug!(error = %e, "Settle predicate failed"),
                    }
                    if Instant::now() + *interval > deadline {
                        tracing::debug!(max_ms = max.as_millis() as u64, "Settle budget exhausted");
                        return;
                    }
                    tokio::time::sleep(*interval).await;
                }
            }
        }
    }
}
