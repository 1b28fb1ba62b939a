//! Drives the "create post" UI as an explicit state machine.
//!
//! ```text
//! Idle -> FeedLoaded -> ComposerOpen -> TextEntered -> [MediaAttached] -> Submitted -> Confirmed
//!   \___________________________ any step ___________________________/-> Failed(reason)
//! ```
//!
//! Media problems never fail a post; everything else maps onto a
//! [`FailureReason`]. The cancel flag is checked between steps.

use crate::automation::auth::AuthenticationDetector;
use crate::automation::locator::{Activation, ElementLocator};
use crate::automation::site::{ConfirmationMarkers, SiteProfile};
use crate::automation::{human_pause, PauseRange};
use crate::browser::diagnostics::Diagnostics;
use crate::browser::driver::{navigate_with_fallback, Key, PageDriver, WaitPolicy};
use crate::core::error::FailureReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ComposerState {
    Idle,
    FeedLoaded,
    ComposerOpen,
    TextEntered,
    MediaAttached,
    Submitted,
    Confirmed,
    Failed(FailureReason),
}

impl ComposerState {
    pub fn label(&self) -> &'static str {
        match self {
            ComposerState::Idle => "idle",
            ComposerState::FeedLoaded => "feed_loaded",
            ComposerState::ComposerOpen => "composer_open",
            ComposerState::TextEntered => "text_entered",
            ComposerState::MediaAttached => "media_attached",
            ComposerState::Submitted => "submitted",
            ComposerState::Confirmed => "confirmed",
            ComposerState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for ComposerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComposerState::Failed(reason) => write!(f, "failed({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Which observation confirmed the post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmSignal {
    Toast,
    NewFeedItem,
    LiveRegion,
}

#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub nav_timeout: Duration,
    pub surface_timeout: Duration,
    pub input_timeout: Duration,
    pub file_input_timeout: Duration,
    pub media_attach_attempts: u32,
    pub media_poll: Duration,
    pub confirm_timeout: Duration,
    pub confirm_poll: Duration,
    /// Pause after the feed loads.
    pub settle: PauseRange,
    /// Pause between steps.
    pub step_pause: PauseRange,
    pub treat_unconfirmed_as_success: bool,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            nav_timeout: Duration::from_secs(30),
            surface_timeout: Duration::from_secs(10),
            input_timeout: Duration::from_secs(5),
            file_input_timeout: Duration::from_secs(5),
            media_attach_attempts: 8,
            media_poll: Duration::from_secs(1),
            confirm_timeout: Duration::from_secs(10),
            confirm_poll: Duration::from_millis(500),
            settle: PauseRange::new(2000, 3000),
            step_pause: PauseRange::new(1000, 2000),
            treat_unconfirmed_as_success: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposeOutcome {
    pub state: ComposerState,
    pub trail: Vec<ComposerState>,
    pub media_attached: bool,
    pub confirmation: Option<ConfirmSignal>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposeFailure {
    pub reason: FailureReason,
    pub message: String,
    pub trail: Vec<ComposerState>,
}

impl fmt::Display for ComposeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl std::error::Error for ComposeFailure {}

/// Page facts used to decide whether a submit went through.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmProbe {
    #[serde(default)]
    pub toast: bool,
    #[serde(default)]
    pub feed_count: usize,
    #[serde(default)]
    pub live_text: String,
}

/// A fresh toast, a grown feed, or a new success announcement.
pub fn detect_confirmation(
    markers: &ConfirmationMarkers,
    baseline: &ConfirmProbe,
    now: &ConfirmProbe,
) -> Option<ConfirmSignal> {
    if now.toast && !baseline.toast {
        return Some(ConfirmSignal::Toast);
    }
    if now.feed_count > baseline.feed_count {
        return Some(ConfirmSignal::NewFeedItem);
    }
    if now.live_text != baseline.live_text {
        let live = now.live_text.to_lowercase();
        if markers.success_words.iter().any(|w| live.contains(w.as_str())) {
            return Some(ConfirmSignal::LiveRegion);
        }
    }
    None
}

type StepResult = Result<(), (FailureReason, String)>;

struct Run {
    state: ComposerState,
    trail: Vec<ComposerState>,
    media_done: bool,
    media_attached: bool,
    baseline: ConfirmProbe,
    confirmation: Option<ConfirmSignal>,
    warnings: Vec<String>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: ComposerState::Idle,
            trail: vec![ComposerState::Idle],
            media_done: false,
            media_attached: false,
            baseline: ConfirmProbe::default(),
            confirmation: None,
            warnings: Vec::new(),
        }
    }

    fn advance(&mut self, next: ComposerState) {
        info!("composer: {} -> {}", self.state, next);
        self.state = next;
        self.trail.push(next);
    }

    fn fail(mut self, reason: FailureReason, message: String) -> ComposeFailure {
        warn!("composer: {} -> failed({}): {}", self.state, reason, message);
        self.trail.push(ComposerState::Failed(reason));
        ComposeFailure {
            reason,
            message,
            trail: self.trail,
        }
    }
}

pub struct PostComposer {
    profile: Arc<SiteProfile>,
    detector: AuthenticationDetector,
    locator: ElementLocator,
    settings: ComposerSettings,
    diagnostics: Diagnostics,
}

impl PostComposer {
    pub fn new(profile: Arc<SiteProfile>, settings: ComposerSettings) -> Self {
        let detector = AuthenticationDetector::new(Arc::clone(&profile)).with_settle(PauseRange::NONE);
        Self {
            profile,
            detector,
            locator: ElementLocator::default(),
            settings,
            diagnostics: Diagnostics::disabled(),
        }
    }

    pub fn with_locator(mut self, locator: ElementLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn settings(&self) -> &ComposerSettings {
        &self.settings
    }

    /// Publishes one post. `media` may be empty.
    pub async fn compose(
        &self,
        driver: &dyn PageDriver,
        text: &str,
        media: &[PathBuf],
        cancel: &watch::Receiver<bool>,
    ) -> Result<ComposeOutcome, ComposeFailure> {
        let mut run = Run::new();

        while run.state != ComposerState::Confirmed {
            if *cancel.borrow() {
                let msg = format!("cancelled in state {}", run.state);
                return Err(run.fail(FailureReason::Cancelled, msg));
            }

            let step: Result<ComposerState, (FailureReason, String)> = match run.state {
                ComposerState::Idle => self.load_feed(driver).await.map(|_| ComposerState::FeedLoaded),
                ComposerState::FeedLoaded => self
                    .open_composer(driver)
                    .await
                    .map(|_| ComposerState::ComposerOpen),
                ComposerState::ComposerOpen => self
                    .enter_text(driver, text, &mut run)
                    .await
                    .map(|_| ComposerState::TextEntered),
                ComposerState::TextEntered if !media.is_empty() && !run.media_done => {
                    run.media_done = true;
                    match self.attach_media(driver, media).await {
                        Ok(()) => {
                            run.media_attached = true;
                            Ok(ComposerState::MediaAttached)
                        }
                        Err(e) => {
                            warn!("composer: media attach failed, posting without media: {}", e);
                            run.warnings.push(format!("media not attached: {e}"));
                            continue;
                        }
                    }
                }
                ComposerState::TextEntered | ComposerState::MediaAttached => self
                    .submit(driver, &mut run)
                    .await
                    .map(|_| ComposerState::Submitted),
                ComposerState::Submitted => self
                    .confirm(driver, &mut run, cancel)
                    .await
                    .map(|_| ComposerState::Confirmed),
                ComposerState::Confirmed | ComposerState::Failed(_) => break,
            };

            match step {
                Ok(next) => {
                    run.advance(next);
                    self.diagnostics.capture(driver, next.label()).await;
                    if next != ComposerState::Confirmed {
                        human_pause(self.settings.step_pause).await;
                    }
                }
                Err((reason, message)) => {
                    self.diagnostics
                        .capture(driver, &format!("failed_after_{}", run.state.label()))
                        .await;
                    return Err(run.fail(reason, message));
                }
            }
        }

        Ok(ComposeOutcome {
            state: run.state,
            trail: run.trail,
            media_attached: run.media_attached,
            confirmation: run.confirmation,
            warnings: run.warnings,
        })
    }

    async fn load_feed(&self, driver: &dyn PageDriver) -> StepResult {
        navigate_with_fallback(
            driver,
            &self.profile.feed_url,
            WaitPolicy::DomContentLoaded,
            self.settings.nav_timeout,
        )
        .await
        .map_err(|e| (FailureReason::NavigationError, e.to_string()))?;
        human_pause(self.settings.settle).await;

        match self.detector.inspect(driver).await {
            Ok(v) if v.is_challenged() => Err((
                FailureReason::SecurityChallenge,
                v.challenge_message.unwrap_or_else(|| "security challenge".into()),
            )),
            Ok(v) if v.signal("url_login") || v.signal("url_checkpoint") => Err((
                FailureReason::NotAuthenticated,
                format!(
                    "feed redirected to {}",
                    v.url.as_deref().unwrap_or("a login page")
                ),
            )),
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("composer: feed inspection failed (continuing): {}", e);
                Ok(())
            }
        }
    }

    async fn open_composer(&self, driver: &dyn PageDriver) -> StepResult {
        self.locator
            .locate(driver, &self.profile.chains.open_composer, Activation::Click)
            .await
            .map(|hit| debug!("composer: opened via '{}'", hit.strategy))
            .map_err(|e| (FailureReason::ComposerNotFound, e.to_string()))
    }

    async fn enter_text(&self, driver: &dyn PageDriver, text: &str, run: &mut Run) -> StepResult {
        let chains = &self.profile.chains;
        self.locator
            .wait_for(
                driver,
                &chains.composer_surface,
                Activation::None,
                self.settings.surface_timeout,
            )
            .await
            .map_err(|e| (FailureReason::TextInputNotFound, format!("composer did not open: {e}")))?;

        self.locator
            .wait_for(driver, &chains.text_input, Activation::Focus, self.settings.input_timeout)
            .await
            .map_err(|e| (FailureReason::TextInputNotFound, e.to_string()))?;

        if let Err(e) = driver.evaluate(CLEAR_FOCUSED_SCRIPT).await {
            debug!("composer: clearing editor failed (continuing): {}", e);
        }
        driver
            .insert_text(text)
            .await
            .map_err(|e| (FailureReason::Internal, format!("text insertion failed: {e}")))?;

        let entered = driver
            .evaluate(FOCUSED_TEXT_SCRIPT)
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        if entered.trim().is_empty() {
            run.warnings.push("editor text could not be read back".into());
        }
        Ok(())
    }

    async fn attach_media(&self, driver: &dyn PageDriver, media: &[PathBuf]) -> Result<(), String> {
        let files: Vec<PathBuf> = media.iter().filter(|p| p.exists()).cloned().collect();
        if files.len() < media.len() {
            warn!(
                "composer: {} of {} media files are missing",
                media.len() - files.len(),
                media.len()
            );
        }
        if files.is_empty() {
            return Err("no media file exists on disk".into());
        }

        self.locator
            .locate(driver, &self.profile.chains.media_button, Activation::Click)
            .await
            .map_err(|e| e.to_string())?;

        let file_input = std::slice::from_ref(&self.profile.file_input);
        if !self
            .wait_present(driver, file_input, self.settings.file_input_timeout)
            .await
        {
            self.dismiss_leftover_dialogs(driver).await;
            return Err("file input did not appear".into());
        }

        driver
            .set_input_files(&self.profile.file_input, &files)
            .await
            .map_err(|e| e.to_string())?;

        let mut attached = false;
        for attempt in 1..=self.settings.media_attach_attempts {
            if self.any_present(driver, &self.profile.attached_media).await {
                attached = true;
                break;
            }
            if self.any_present(driver, &self.profile.media_editor).await {
                match self
                    .locator
                    .locate(driver, &self.profile.chains.advance_media, Activation::Click)
                    .await
                {
                    Ok(hit) => debug!("composer: advanced media editor via '{}'", hit.strategy),
                    Err(e) => debug!("composer: media editor advance missed: {}", e),
                }
            }
            debug!("composer: waiting for attached media ({}/{})", attempt, self.settings.media_attach_attempts);
            tokio::time::sleep(self.settings.media_poll).await;
        }

        self.dismiss_leftover_dialogs(driver).await;

        if attached || self.any_present(driver, &self.profile.attached_media).await {
            info!("composer: {} media file(s) attached", files.len());
            Ok(())
        } else {
            Err(format!(
                "attachment not visible after {} checks",
                self.settings.media_attach_attempts
            ))
        }
    }

    /// Close button, then backdrop click, then Escape. Never targets the
    /// dialog holding the composer's editor.
    async fn dismiss_leftover_dialogs(&self, driver: &dyn PageDriver) {
        let state = self.leftover(driver).await;
        if !state.dialog {
            return;
        }

        if self
            .locator
            .locate(driver, &self.profile.chains.close_dialog, Activation::Click)
            .await
            .is_ok()
        {
            human_pause(self.settings.step_pause).await;
            if !self.leftover(driver).await.dialog {
                debug!("composer: leftover dialog closed");
                return;
            }
        }

        if state.backdrop {
            let (x, y) = self.profile.backdrop_click;
            if let Err(e) = driver.click_at(x, y).await {
                debug!("composer: backdrop click failed: {}", e);
            }
            if !self.leftover(driver).await.dialog {
                debug!("composer: leftover dialog closed by backdrop click");
                return;
            }
        }

        if let Err(e) = driver.press_key(Key::Escape).await {
            debug!("composer: escape failed: {}", e);
        }
    }

    async fn submit(&self, driver: &dyn PageDriver, run: &mut Run) -> StepResult {
        run.baseline = self.confirm_probe(driver).await.unwrap_or_default();
        self.locator
            .locate(driver, &self.profile.chains.submit, Activation::Click)
            .await
            .map(|hit| debug!("composer: submitted via '{}'", hit.strategy))
            .map_err(|e| (FailureReason::SubmitNotFound, e.to_string()))
    }

    async fn confirm(
        &self,
        driver: &dyn PageDriver,
        run: &mut Run,
        cancel: &watch::Receiver<bool>,
    ) -> StepResult {
        let deadline = Instant::now() + self.settings.confirm_timeout;
        loop {
            if let Some(probe) = self.confirm_probe(driver).await {
                if let Some(signal) =
                    detect_confirmation(&self.profile.confirmation, &run.baseline, &probe)
                {
                    info!("composer: post confirmed by {:?}", signal);
                    run.confirmation = Some(signal);
                    return Ok(());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if *cancel.borrow() {
                return Err((FailureReason::Cancelled, "cancelled while confirming".into()));
            }
            tokio::time::sleep(self.settings.confirm_poll.min(deadline - now)).await;
        }

        let msg = format!(
            "no confirmation within {}ms of submitting",
            self.settings.confirm_timeout.as_millis()
        );
        if self.settings.treat_unconfirmed_as_success {
            warn!("composer: {}; treating as published", msg);
            run.warnings.push(msg);
            Ok(())
        } else {
            Err((FailureReason::Unconfirmed, msg))
        }
    }

    async fn confirm_probe(&self, driver: &dyn PageDriver) -> Option<ConfirmProbe> {
        let c = &self.profile.confirmation;
        let script = format!(
            r#"// probe:confirm
(() => {{
  const live = document.querySelector({live});
  return {{
    toast: !!document.querySelector({toast}),
    feedCount: document.querySelectorAll({feed}).length,
    liveText: live ? (live.innerText || live.textContent || '') : '',
  }};
}})()"#,
            live = js_str(&c.live_region),
            toast = js_str(&c.toast),
            feed = js_str(&c.feed_item),
        );
        match driver.evaluate(&script).await {
            Ok(v) => serde_json::from_value(v).ok(),
            Err(e) => {
                debug!("composer: confirmation probe failed: {}", e);
                None
            }
        }
    }

    async fn leftover(&self, driver: &dyn PageDriver) -> Leftover {
        let p = &self.profile;
        let script = format!(
            r#"// probe:leftover
(() => {{
  const editor = {editor};
  const dialogs = Array.from(document.querySelectorAll({dialogs})).filter((d) => {{
    const r = d.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  }});
  const stray = dialogs.filter((d) => !d.querySelector(editor));
  const composerOpen = dialogs.some((d) => !!d.querySelector(editor));
  return {{ dialog: stray.length > 0, backdrop: stray.length > 0 && !composerOpen && !!document.querySelector({backdrop}) }};
}})()"#,
            editor = js_str(&p.editor_marker),
            dialogs = js_str(&p.dialogs.join(", ")),
            backdrop = js_str(&p.backdrop),
        );
        driver
            .evaluate(&script)
            .await
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    async fn any_present(&self, driver: &dyn PageDriver, selectors: &[String]) -> bool {
        let script = format!(
            r#"// probe:presence
(() => {sels}.some((s) => {{ try {{ return !!document.querySelector(s); }} catch (e) {{ return false; }} }}))()"#,
            sels = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".into()),
        );
        matches!(driver.evaluate(&script).await, Ok(v) if v.as_bool() == Some(true))
    }

    async fn wait_present(&self, driver: &dyn PageDriver, selectors: &[String], budget: Duration) -> bool {
        let deadline = Instant::now() + budget;
        loop {
            if self.any_present(driver, selectors).await {
                return true;
            }
            if Instant::now() + self.locator.poll_interval >= deadline {
                return false;
            }
            tokio::time::sleep(self.locator.poll_interval).await;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Leftover {
    #[serde(default)]
    dialog: bool,
    #[serde(default)]
    backdrop: bool,
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

const CLEAR_FOCUSED_SCRIPT: &str = r#"// probe:clear
(() => {
  const el = document.activeElement;
  if (!el) return false;
  if ('value' in el && typeof el.value === 'string') { el.value = ''; return true; }
  document.execCommand('selectAll', false, null);
  document.execCommand('delete', false, null);
  return true;
})()"#;

const FOCUSED_TEXT_SCRIPT: &str = r#"// probe:focused-text
(() => {
  const el = document.activeElement;
  if (!el) return '';
  return ('value' in el && typeof el.value === 'string') ? el.value : (el.innerText || '');
})()"#;
