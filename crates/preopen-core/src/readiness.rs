use std::time::Duration;

use crate::error::AppError;
use crate::settle::SettlePolicy;
use crate::traits::PageSession;

/// Navigates a session and blocks until the page is reasonably interactive.
///
/// "Navigation complete" is not enough on a client-rendered target, so the
/// settle policy runs afterwards as a second signal.
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    navigation_timeout: Duration,
    settle: SettlePolicy,
}

impl ReadinessWaiter {
    pub fn new(navigation_timeout: Duration, settle: SettlePolicy) -> Self {
        Self {
            navigation_timeout,
            settle,
        }
    }

    /// Navigate to `url`, then settle.
    ///
    /// Fails with [`AppError::NavigationTimeout`] or
    /// [`AppError::NavigationError`]; both are fatal to the run.
    pub async fn wait<S: PageSession>(&self, session: &S, url: &str) -> Result<(), AppError> {
        tracing::info!(%url, "Navigating");

        match tokio::time::timeout(self.navigation_timeout, session.navigate(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(AppError::NavigationTimeout(secs))) => {
                return Err(AppError::NavigationTimeout(secs));
            }
            Ok(Err(e)) => return Err(AppError::NavigationError(e.to_string())),
            Err(_) => {
                return Err(AppError::NavigationTimeout(
                    self.navigation_timeout.as_secs(),
                ));
            }
        }

        self.settle.apply(session).await;
        tracing::info!("Page ready");
        Ok(())
    }
}
