#![allow(dead_code)]

use async_trait::async_trait;
use postpilot::automation::composer::{ComposeFailure, ComposeOutcome, ComposerState};
use postpilot::automation::PostPipeline;
use postpilot::browser::{Key, PageDriver, WaitPolicy};
use postpilot::{AuthState, AuthVerdict, AutomationError, FailureReason};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Polls `cond` every 5ms until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted page driver
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String, WaitPolicy),
    Evaluate(String),
    ClickAt(f64, f64),
    Key(Key),
    InsertText(String),
    SetFiles(String, Vec<PathBuf>),
}

struct Rule {
    needles: Vec<String>,
    replies: Vec<Value>,
    served: usize,
}

/// Answers `evaluate` from rules: the first rule whose needles all occur in
/// the script replies (sequence replies advance per call, the last repeats).
/// Unmatched scripts evaluate to `null`.
#[derive(Default)]
pub struct ScriptedDriver {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Call>>,
    failing_navigation: Mutex<bool>,
    url: Mutex<String>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, needles: &[&str], reply: Value) -> &Self {
        self.on_seq(needles, vec![reply])
    }

    pub fn on_seq(&self, needles: &[&str], replies: Vec<Value>) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            needles: needles.iter().map(|s| s.to_string()).collect(),
            replies,
            served: 0,
        });
        self
    }

    pub fn fail_navigation(&self) {
        *self.failing_navigation.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn evaluations_containing(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Evaluate(s) if s.contains(needle)))
            .count()
    }

    pub fn navigations(&self) -> Vec<(String, WaitPolicy)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Navigate(u, p) => Some((u, p)),
                _ => None,
            })
            .collect()
    }

    pub fn inserted_text(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::InsertText(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn found() -> Value {
    json!({ "found": true, "x": 100.0, "y": 120.0 })
}

pub fn feed_snapshot(markers: &[&str]) -> Value {
    let markers: BTreeMap<&str, bool> = markers.iter().map(|m| (*m, true)).collect();
    json!({ "url": "https://www.linkedin.com/feed/", "text": "", "markers": markers })
}

pub fn confirm_probe(feed_count: usize) -> Value {
    json!({ "toast": false, "feedCount": feed_count, "liveText": "" })
}

#[async_trait]
impl PageDriver for ScriptedDriver {
    async fn navigate(
        &self,
        url: &str,
        policy: WaitPolicy,
        _timeout: Duration,
    ) -> Result<(), AutomationError> {
        self.record(Call::Navigate(url.to_string(), policy));
        if *self.failing_navigation.lock().unwrap() {
            return Err(AutomationError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            });
        }
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AutomationError> {
        self.record(Call::Evaluate(script.to_string()));
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.needles.iter().all(|n| script.contains(n.as_str())) {
                let idx = rule.served.min(rule.replies.len().saturating_sub(1));
                rule.served += 1;
                return Ok(rule.replies.get(idx).cloned().unwrap_or(Value::Null));
            }
        }
        if script == "window.location.href" {
            return Ok(Value::String(self.url.lock().unwrap().clone()));
        }
        Ok(Value::Null)
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        self.record(Call::ClickAt(x, y));
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<(), AutomationError> {
        self.record(Call::Key(key));
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), AutomationError> {
        self.record(Call::InsertText(text.to_string()));
        Ok(())
    }

    async fn set_input_files(
        &self,
        selector: &str,
        files: &[PathBuf],
    ) -> Result<(), AutomationError> {
        self.record(Call::SetFiles(selector.to_string(), files.to_vec()));
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn html(&self) -> Result<String, AutomationError> {
        Ok("<html></html>".into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted pipeline
// ─────────────────────────────────────────────────────────────────────────────

pub fn verdict(state: AuthState) -> AuthVerdict {
    AuthVerdict {
        state,
        signals: BTreeMap::new(),
        nav_count: if state == AuthState::LoggedIn { 5 } else { 0 },
        challenge_message: (state == AuthState::Challenged)
            .then(|| "security alert: \"verify your identity\"".to_string()),
        url: Some("https://www.linkedin.com/feed/".into()),
    }
}

pub fn published() -> Result<ComposeOutcome, ComposeFailure> {
    Ok(ComposeOutcome {
        state: ComposerState::Confirmed,
        trail: vec![ComposerState::Idle, ComposerState::Confirmed],
        media_attached: false,
        confirmation: None,
        warnings: vec![],
    })
}

pub fn failed(reason: FailureReason) -> Result<ComposeOutcome, ComposeFailure> {
    Err(ComposeFailure {
        reason,
        message: format!("scripted {reason}"),
        trail: vec![ComposerState::Idle, ComposerState::Failed(reason)],
    })
}

pub struct FakePipeline {
    auth: Mutex<Result<AuthVerdict, String>>,
    outcomes: Mutex<VecDeque<Result<ComposeOutcome, ComposeFailure>>>,
    pub published: Mutex<Vec<(String, Vec<PathBuf>)>>,
    pub auth_checks: AtomicUsize,
    publish_delay: Duration,
}

impl FakePipeline {
    pub fn logged_in() -> Self {
        Self::with_auth(Ok(verdict(AuthState::LoggedIn)))
    }

    pub fn with_auth(auth: Result<AuthVerdict, String>) -> Self {
        Self {
            auth: Mutex::new(auth),
            outcomes: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            auth_checks: AtomicUsize::new(0),
            publish_delay: Duration::ZERO,
        }
    }

    /// Every publish sleeps this long before finishing, ignoring cancellation.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.publish_delay = delay;
        self
    }

    /// Queues publish results; once drained every publish succeeds.
    pub fn then(self, outcome: Result<ComposeOutcome, ComposeFailure>) -> Self {
        self.outcomes.lock().unwrap().push_back(outcome);
        self
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl PostPipeline for FakePipeline {
    async fn check_authentication(&self) -> Result<AuthVerdict, AutomationError> {
        self.auth_checks.fetch_add(1, Ordering::SeqCst);
        self.auth.lock().unwrap().clone().map_err(|reason| AutomationError::Navigation {
            url: "https://www.linkedin.com/".into(),
            reason,
        })
    }

    async fn publish(
        &self,
        text: &str,
        media: &[PathBuf],
        _cancel: &watch::Receiver<bool>,
    ) -> Result<ComposeOutcome, ComposeFailure> {
        if !self.publish_delay.is_zero() {
            tokio::time::sleep(self.publish_delay).await;
        }
        self.published
            .lock()
            .unwrap()
            .push((text.to_string(), media.to_vec()));
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(published)
    }
}
