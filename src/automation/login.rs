use crate::automation::auth::AuthenticationDetector;
use crate::browser::driver::{navigate_with_fallback, PageDriver, WaitPolicy};
use crate::core::error::AutomationError;
use crate::core::types::{AuthState, AuthVerdict};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub success: bool,
    pub message: String,
    pub verdict: Option<AuthVerdict>,
}

#[derive(Debug, Clone, Copy)]
pub struct LoginPrompt {
    pub max_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for LoginPrompt {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(180),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl LoginPrompt {
    /// Opens the login page in the (headful) session and waits for the user
    /// to sign in by hand. Returns immediately when already logged in.
    pub async fn run(
        &self,
        detector: &AuthenticationDetector,
        driver: &dyn PageDriver,
    ) -> Result<LoginOutcome, AutomationError> {
        let current = detector.check(driver).await?;
        if current.is_logged_in() {
            return Ok(LoginOutcome {
                success: true,
                message: "already logged in".into(),
                verdict: Some(current),
            });
        }

        let login_url = detector.profile().login_url.clone();
        navigate_with_fallback(driver, &login_url, WaitPolicy::DomContentLoaded, detector.nav_timeout)
            .await?;
        info!(
            "login: waiting up to {}s for manual sign-in at {}",
            self.max_wait.as_secs(),
            login_url
        );

        let deadline = Instant::now() + self.max_wait;
        let mut last = None;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;

            match detector.inspect(driver).await {
                Ok(v) if v.is_logged_in() => {
                    info!("login: sign-in detected");
                    return Ok(LoginOutcome {
                        success: true,
                        message: "login successful".into(),
                        verdict: Some(v),
                    });
                }
                Ok(v) => {
                    if v.state == AuthState::Challenged {
                        warn!(
                            "login: challenge on screen, waiting for the user ({})",
                            v.challenge_message.as_deref().unwrap_or("unknown")
                        );
                    }
                    last = Some(v);
                }
                Err(e) => warn!("login: inspection failed (retrying): {}", e),
            }
        }

        Ok(LoginOutcome {
            success: false,
            message: format!("login not completed within {}s", self.max_wait.as_secs()),
            verdict: last,
        })
    }
}
