use crate::core::error::AutomationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// How far a navigation must progress before it counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    Load,
    DomContentLoaded,
    Commit,
}

impl WaitPolicy {
    pub fn looser(self) -> Option<WaitPolicy> {
        match self {
            WaitPolicy::Load => Some(WaitPolicy::DomContentLoaded),
            WaitPolicy::DomContentLoaded => Some(WaitPolicy::Commit),
            WaitPolicy::Commit => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Enter,
    Tab,
}

impl Key {
    pub fn name(self) -> &'static str {
        match self {
            Key::Escape => "Escape",
            Key::Enter => "Enter",
            Key::Tab => "Tab",
        }
    }

    pub fn virtual_code(self) -> i64 {
        match self {
            Key::Escape => 27,
            Key::Enter => 13,
            Key::Tab => 9,
        }
    }
}

/// The page operations the automation needs. `BrowserSession` implements it
/// over CDP; tests substitute scripted fakes.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(
        &self,
        url: &str,
        policy: WaitPolicy,
        timeout: Duration,
    ) -> Result<(), AutomationError>;

    /// Evaluates a script and returns its JSON value (`Null` for `undefined`).
    async fn evaluate(&self, script: &str) -> Result<Value, AutomationError>;

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError>;

    async fn press_key(&self, key: Key) -> Result<(), AutomationError>;

    /// Inserts text at the current focus as a single input event.
    async fn insert_text(&self, text: &str) -> Result<(), AutomationError>;

    async fn set_input_files(
        &self,
        selector: &str,
        files: &[PathBuf],
    ) -> Result<(), AutomationError>;

    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError>;

    async fn html(&self) -> Result<String, AutomationError>;

    async fn current_url(&self) -> Result<String, AutomationError> {
        let value = self.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

/// Navigates with `policy`, retrying once with the next looser policy.
pub async fn navigate_with_fallback(
    driver: &dyn PageDriver,
    url: &str,
    policy: WaitPolicy,
    timeout: Duration,
) -> Result<(), AutomationError> {
    match driver.navigate(url, policy, timeout).await {
        Ok(()) => Ok(()),
        Err(first) => {
            let Some(looser) = policy.looser() else {
                return Err(first);
            };
            warn!(
                "driver: navigation to {} failed under {:?} ({}); retrying with {:?}",
                url, policy, first, looser
            );
            driver.navigate(url, looser, timeout).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FlakyNav {
        calls: Mutex<Vec<WaitPolicy>>,
        fail_under: Vec<WaitPolicy>,
    }

    #[async_trait]
    impl PageDriver for FlakyNav {
        async fn navigate(
            &self,
            url: &str,
            policy: WaitPolicy,
            _timeout: Duration,
        ) -> Result<(), AutomationError> {
            self.calls.lock().unwrap().push(policy);
            if self.fail_under.contains(&policy) {
                return Err(AutomationError::Navigation {
                    url: url.to_string(),
                    reason: "timed out".into(),
                });
            }
            Ok(())
        }
        async fn evaluate(&self, _script: &str) -> Result<Value, AutomationError> {
            Ok(Value::Null)
        }
        async fn click_at(&self, _x: f64, _y: f64) -> Result<(), AutomationError> {
            Ok(())
        }
        async fn press_key(&self, _key: Key) -> Result<(), AutomationError> {
            Ok(())
        }
        async fn insert_text(&self, _text: &str) -> Result<(), AutomationError> {
            Ok(())
        }
        async fn set_input_files(&self, _s: &str, _f: &[PathBuf]) -> Result<(), AutomationError> {
            Ok(())
        }
        async fn screenshot(&self) -> Result<Vec<u8>, AutomationError> {
            Ok(vec![])
        }
        async fn html(&self) -> Result<String, AutomationError> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn retries_once_with_looser_policy() {
        let driver = FlakyNav {
            calls: Mutex::new(vec![]),
            fail_under: vec![WaitPolicy::Load],
        };
        navigate_with_fallback(&driver, "https://x.test", WaitPolicy::Load, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            *driver.calls.lock().unwrap(),
            vec![WaitPolicy::Load, WaitPolicy::DomContentLoaded]
        );
    }

    #[tokio::test]
    async fn gives_up_after_single_retry() {
        let driver = FlakyNav {
            calls: Mutex::new(vec![]),
            fail_under: vec![WaitPolicy::DomContentLoaded, WaitPolicy::Commit],
        };
        let res = navigate_with_fallback(
            &driver,
            "https://x.test",
            WaitPolicy::DomContentLoaded,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(res, Err(AutomationError::Navigation { .. })));
        assert_eq!(driver.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn commit_has_no_looser_policy() {
        assert_eq!(WaitPolicy::Commit.looser(), None);
    }
}
