use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a post request ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NotAuthenticated,
    SecurityChallenge,
    NavigationError,
    ComposerNotFound,
    TextInputNotFound,
    SubmitNotFound,
    Unconfirmed,
    Cancelled,
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NotAuthenticated => "not_authenticated",
            FailureReason::SecurityChallenge => "security_challenge",
            FailureReason::NavigationError => "navigation_error",
            FailureReason::ComposerNotFound => "composer_not_found",
            FailureReason::TextInputNotFound => "text_input_not_found",
            FailureReason::SubmitNotFound => "submit_not_found",
            FailureReason::Unconfirmed => "unconfirmed",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page evaluation failed: {0}")]
    Evaluation(String),

    #[error("{target} not found (tried: {tried})")]
    ElementNotFound { target: String, tried: String },

    #[error("security challenge detected: {0}")]
    SecurityChallenge(String),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("browser session is not ready")]
    SessionNotReady,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AutomationError {
    /// Maps an error onto the failure reason recorded against a post request.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            AutomationError::Navigation { .. } => FailureReason::NavigationError,
            AutomationError::SecurityChallenge(_) => FailureReason::SecurityChallenge,
            AutomationError::NotAuthenticated(_) => FailureReason::NotAuthenticated,
            AutomationError::Cancelled => FailureReason::Cancelled,
            AutomationError::BrowserLaunch(_) | AutomationError::SessionNotReady => {
                FailureReason::NavigationError
            }
            _ => FailureReason::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FailureReason::ComposerNotFound).unwrap();
        assert_eq!(json, "\"composer_not_found\"");
        assert_eq!(FailureReason::Unconfirmed.to_string(), "unconfirmed");
    }

    #[test]
    fn navigation_errors_map_to_navigation_reason() {
        let err = AutomationError::Navigation {
            url: "https://example.com".into(),
            reason: "timeout".into(),
        };
        assert_eq!(err.failure_reason(), FailureReason::NavigationError);
        assert_eq!(
            AutomationError::Evaluation("boom".into()).failure_reason(),
            FailureReason::Internal
        );
    }
}
