use crate::core::error::FailureReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Characters of post text kept in a history entry.
pub const HISTORY_TEXT_LIMIT: usize = 150;
/// Characters of post text kept in an error entry.
pub const ERROR_TEXT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    LoggedIn,
    LoggedOut,
    Challenged,
}

/// Result of inspecting the current page for login state.
///
/// `signals` carries every boolean the classifier looked at so callers can
/// log why a verdict was reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthVerdict {
    pub state: AuthState,
    pub signals: BTreeMap<String, bool>,
    #[serde(default)]
    pub nav_count: usize,
    #[serde(default)]
    pub challenge_message: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl AuthVerdict {
    pub fn is_logged_in(&self) -> bool {
        self.state == AuthState::LoggedIn
    }

    pub fn is_challenged(&self) -> bool {
        self.state == AuthState::Challenged
    }

    pub fn signal(&self, name: &str) -> bool {
        self.signals.get(name).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PostStatus {
    Queued,
    Processing,
    Completed,
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl PostStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Completed | PostStatus::Failed { .. })
    }
}

/// One unit of work for the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRequest {
    pub id: Uuid,
    pub text: String,
    #[serde(default)]
    pub media_paths: Vec<PathBuf>,
    pub queued_at: DateTime<Utc>,
    pub status: PostStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PostRequest {
    /// Builds a queued request. Returns `None` when the text is blank.
    pub fn new(text: impl Into<String>, media_paths: Vec<PathBuf>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4(),
            text,
            media_paths,
            queued_at: Utc::now(),
            status: PostStatus::Queued,
            started_at: None,
            finished_at: None,
        })
    }

    pub fn mark_processing(&mut self) -> bool {
        if self.status != PostStatus::Queued {
            return false;
        }
        self.status = PostStatus::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    pub fn complete(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = PostStatus::Completed;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn fail(&mut self, reason: FailureReason, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = PostStatus::Failed {
            reason,
            message: message.into(),
        };
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match &self.status {
            PostStatus::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Observable scheduler state, published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub running: bool,
    pub in_flight: bool,
    pub queue_size: usize,
    pub interval_minutes: u32,
    pub last_post_at: Option<DateTime<Utc>>,
    pub next_post_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub media_count: usize,
    #[serde(default = "default_history_status")]
    pub status: String,
    #[serde(default)]
    pub post_id: Option<Uuid>,
}

fn default_history_status() -> String {
    "published".to_string()
}

impl HistoryEntry {
    pub fn published(request: &PostRequest) -> Self {
        Self {
            timestamp: Utc::now(),
            text: truncate_chars(&request.text, HISTORY_TEXT_LIMIT),
            media_count: request.media_paths.len(),
            status: default_history_status(),
            post_id: Some(request.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub reason: Option<FailureReason>,
    #[serde(default)]
    pub post_text: Option<String>,
    #[serde(default)]
    pub post_id: Option<Uuid>,
}

impl ErrorEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            reason: None,
            post_text: None,
            post_id: None,
        }
    }

    pub fn for_post(request: &PostRequest, reason: FailureReason, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.to_string(),
            reason: Some(reason),
            post_text: Some(truncate_chars(&request.text, ERROR_TEXT_LIMIT)),
            post_id: Some(request.id),
        }
    }
}

/// Truncates on a char boundary and appends `...` when anything was cut.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_rejected() {
        assert!(PostRequest::new("", vec![]).is_none());
        assert!(PostRequest::new("   \n", vec![]).is_none());
        let req = PostRequest::new("hello", vec![]).unwrap();
        assert_eq!(req.status, PostStatus::Queued);
    }

    #[test]
    fn terminal_status_is_immutable() {
        let mut req = PostRequest::new("hello", vec![]).unwrap();
        assert!(req.mark_processing());
        assert!(req.complete());
        assert!(!req.fail(FailureReason::Internal, "late"));
        assert!(!req.mark_processing());
        assert_eq!(req.status, PostStatus::Completed);
    }

    #[test]
    fn failure_records_reason() {
        let mut req = PostRequest::new("hello", vec![]).unwrap();
        req.mark_processing();
        req.fail(FailureReason::ComposerNotFound, "no button");
        assert_eq!(req.failure_reason(), Some(FailureReason::ComposerNotFound));
        assert!(req.finished_at.is_some());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("ééééé", 3), "ééé...");
        let long = "x".repeat(200);
        let req = PostRequest::new(long, vec![]).unwrap();
        let entry = HistoryEntry::published(&req);
        assert_eq!(entry.text.chars().count(), HISTORY_TEXT_LIMIT + 3);
    }
}
