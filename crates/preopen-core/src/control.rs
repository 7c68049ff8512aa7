use std::time::Duration;

use crate::error::AppError;
use crate::settle::SettlePolicy;
use crate::traits::PageSession;

/// Locates the scope-selector control and picks an option by value.
#[derive(Debug, Clone)]
pub struct ControlSelector {
    selector: String,
    option_value: String,
    wait: Duration,
    settle: SettlePolicy,
}

impl ControlSelector {
    pub fn new(
        selector: impl Into<String>,
        option_value: impl Into<String>,
        wait: Duration,
        settle: SettlePolicy,
    ) -> Self {
        Self {
            selector: selector.into(),
            option_value: option_value.into(),
            wait,
            settle,
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Wait for the control, open it, assign the option value, then let the
    /// page refresh its data.
    ///
    /// A control that never shows up yields [`AppError::ControlNotFound`],
    /// which the orchestrator treats as a partial failure.
    pub async fn select<S: PageSession>(&self, session: &S) -> Result<(), AppError> {
        tracing::info!(selector = %self.selector, wait_secs = self.wait.as_secs(), "Waiting for control");

        if !session.wait_for_element(&self.selector, self.wait).await? {
            return Err(self.not_found());
        }

        session.click(&self.selector).await?;

        if !session
            .set_select_value(&self.selector, &self.option_value)
            .await?
        {
            return Err(self.not_found());
        }
        tracing::info!(selector = %self.selector, value = %self.option_value, "Option selected");

        self.settle.apply(session).await;
        Ok(())
    }

    fn not_found(&self) -> AppError {
        AppError::ControlNotFound {
            selector: self.selector.clone(),
            waited_secs: self.wait.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockSession;

    fn selector() -> ControlSelector {
        ControlSelector::new(
            "#sel-Pre-Open-Market",
            "ALL",
            Duration::from_secs(15),
            SettlePolicy::None,
        )
    }

    #[tokio::test]
    async fn opens_control_then_assigns_value() {
        let session = MockSession::new();

        selector().select(&session).await.unwrap();

        let calls = session.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "wait:#sel-Pre-Open-Market",
                "click:#sel-Pre-Open-Market",
                "select:#sel-Pre-Open-Market=ALL",
            ]
        );
    }

    #[tokio::test]
    async fn missing_control_is_not_found() {
        let session = MockSession::new().without_control();

        let err = selector().select(&session).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::ControlNotFound { ref selector, waited_secs: 15 } if selector == "#sel-Pre-Open-Market"
        ));
        assert!(!session.called("click:"));
    }

    #[tokio::test]
    async fn vanished_control_is_not_found() {
        let session = MockSession::new().with_select_ignored();

        let err = selector().select(&session).await.unwrap_err();

        assert!(matches!(err, AppError::ControlNotFound { .. }));
    }
}
