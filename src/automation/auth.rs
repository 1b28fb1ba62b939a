//! Login-state detection.
//!
//! [`AuthenticationDetector::inspect`] reads the current page without
//! navigating; [`AuthenticationDetector::check`] navigates home first. Both
//! feed the same pure [`classify`](AuthenticationDetector::classify) step.

use crate::automation::{human_pause, PauseRange};
use crate::automation::site::SiteProfile;
use crate::browser::driver::{navigate_with_fallback, PageDriver, WaitPolicy};
use crate::core::error::AutomationError;
use crate::core::types::{AuthState, AuthVerdict};
use aho_corasick::AhoCorasick;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BODY_TEXT_LIMIT: usize = 50_000;

/// Raw page facts returned by the in-page probe.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub markers: HashMap<String, bool>,
}

impl PageSnapshot {
    pub fn marker(&self, name: &str) -> bool {
        self.markers.get(name).copied().unwrap_or(false)
    }
}

/// Substring matcher over a fixed phrase list.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrases: Vec<String>,
    automaton: Option<AhoCorasick>,
    case_insensitive: bool,
}

impl PhraseMatcher {
    pub fn new(phrases: &[String], case_insensitive: bool) -> Self {
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(case_insensitive)
            .build(phrases)
            .map_err(|e| warn!("auth: phrase automaton build failed, using linear scan: {}", e))
            .ok();
        Self {
            phrases: phrases.to_vec(),
            automaton,
            case_insensitive,
        }
    }

    /// First phrase (by position in `text`) found in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        if let Some(ac) = &self.automaton {
            return ac
                .find(text)
                .map(|m| self.phrases[m.pattern().as_usize()].as_str());
        }
        let hay = if self.case_insensitive {
            text.to_lowercase()
        } else {
            text.to_string()
        };
        self.phrases.iter().map(String::as_str).find(|p| {
            if self.case_insensitive {
                hay.contains(&p.to_lowercase())
            } else {
                hay.contains(p)
            }
        })
    }

    pub fn contains_all(&self, text: &str) -> bool {
        !self.phrases.is_empty() && self.phrases.iter().all(|p| text.contains(p.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct AuthenticationDetector {
    profile: Arc<SiteProfile>,
    challenge_phrases: PhraseMatcher,
    greetings: PhraseMatcher,
    guest: PhraseMatcher,
    probe: String,
    pub nav_timeout: Duration,
    pub settle: PauseRange,
}

impl AuthenticationDetector {
    pub fn new(profile: Arc<SiteProfile>) -> Self {
        let challenge_phrases = PhraseMatcher::new(&profile.challenge_phrases, true);
        let greetings = PhraseMatcher::new(&profile.greeting_phrases, false);
        let guest = PhraseMatcher::new(&profile.guest_phrases, false);
        let probe = probe_script(&profile);
        Self {
            profile,
            challenge_phrases,
            greetings,
            guest,
            probe,
            nav_timeout: Duration::from_secs(15),
            settle: PauseRange::new(2000, 3000),
        }
    }

    pub fn with_settle(mut self, settle: PauseRange) -> Self {
        self.settle = settle;
        self
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Navigates home, lets the page settle, then inspects it.
    pub async fn check(&self, driver: &dyn PageDriver) -> Result<AuthVerdict, AutomationError> {
        navigate_with_fallback(
            driver,
            &self.profile.home_url,
            WaitPolicy::DomContentLoaded,
            self.nav_timeout,
        )
        .await?;
        human_pause(self.settle).await;
        let verdict = self.inspect(driver).await?;
        info!(
            "auth: {:?} (nav signals {}, url {})",
            verdict.state,
            verdict.nav_count,
            verdict.url.as_deref().unwrap_or("?")
        );
        Ok(verdict)
    }

    /// Classifies the page as it is now. No navigation, no side effects.
    pub async fn inspect(&self, driver: &dyn PageDriver) -> Result<AuthVerdict, AutomationError> {
        let raw = driver.evaluate(&self.probe).await?;
        let snapshot: PageSnapshot = serde_json::from_value(raw)
            .map_err(|e| AutomationError::Evaluation(format!("auth probe returned bad shape: {e}")))?;
        Ok(self.classify(&snapshot))
    }

    pub fn classify(&self, snap: &PageSnapshot) -> AuthVerdict {
        let p = &self.profile;
        let mut signals = BTreeMap::new();

        let challenge_el = p
            .challenge_selectors
            .iter()
            .find(|s| snap.marker(&challenge_key(s)));
        let challenge_phrase = self.challenge_phrases.find(&snap.text);
        signals.insert("challenge_element".to_string(), challenge_el.is_some());
        signals.insert("challenge_text".to_string(), challenge_phrase.is_some());

        if challenge_el.is_some() || challenge_phrase.is_some() {
            let message = match (challenge_phrase, challenge_el) {
                (Some(phrase), _) => format!("security alert: \"{phrase}\""),
                (None, Some(sel)) => format!("security challenge element present: {sel}"),
                (None, None) => "security challenge".to_string(),
            };
            debug!("auth: challenge detected ({})", message);
            return AuthVerdict {
                state: AuthState::Challenged,
                signals,
                nav_count: 0,
                challenge_message: Some(message),
                url: Some(snap.url.clone()),
            };
        }

        let mut nav_count = 0;
        for probe in &p.chrome_signals {
            let on = snap.marker(&probe.name);
            nav_count += usize::from(on);
            signals.insert(probe.name.clone(), on);
        }

        let is_login = p.is_login_url(&snap.url);
        let is_checkpoint = p.is_checkpoint_url(&snap.url);
        let is_home = p.is_home_url(&snap.url);
        let has_login_form = snap.marker(&p.login_form.name);
        let has_greeting = self.greetings.find(&snap.text).is_some();

        signals.insert("url_login".to_string(), is_login);
        signals.insert("url_checkpoint".to_string(), is_checkpoint);
        signals.insert("url_home".to_string(), is_home);
        signals.insert(p.login_form.name.clone(), has_login_form);
        signals.insert(p.sign_in_link.name.clone(), snap.marker(&p.sign_in_link.name));
        signals.insert("greeting".to_string(), has_greeting);
        signals.insert("guest_text".to_string(), self.guest.contains_all(&snap.text));

        let by_chrome =
            nav_count >= p.chrome_threshold && !is_login && !is_checkpoint && !has_login_form;
        let by_greeting = is_home && has_greeting && !has_login_form;

        AuthVerdict {
            state: if by_chrome || by_greeting {
                AuthState::LoggedIn
            } else {
                AuthState::LoggedOut
            },
            signals,
            nav_count,
            challenge_message: None,
            url: Some(snap.url.clone()),
        }
    }
}

fn challenge_key(selector: &str) -> String {
    format!("challenge:{selector}")
}

/// Builds the read-only in-page probe for `profile`.
fn probe_script(profile: &SiteProfile) -> String {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for probe in &profile.chrome_signals {
        groups.insert(probe.name.clone(), probe.selectors.clone());
    }
    groups.insert(profile.login_form.name.clone(), profile.login_form.selectors.clone());
    groups.insert(profile.sign_in_link.name.clone(), profile.sign_in_link.selectors.clone());
    for sel in &profile.challenge_selectors {
        groups.insert(challenge_key(sel), vec![sel.clone()]);
    }
    let groups = serde_json::to_string(&groups).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"// probe:auth
(() => {{
  const groups = {groups};
  const markers = {{}};
  for (const [name, selectors] of Object.entries(groups)) {{
    markers[name] = selectors.some((s) => {{
      try {{ return !!document.querySelector(s); }} catch (e) {{ return false; }}
    }});
  }}
  const text = document.body ? (document.body.innerText || '') : '';
  return {{ url: window.location.href, text: text.slice(0, {BODY_TEXT_LIMIT}), markers }};
}})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AuthenticationDetector {
        AuthenticationDetector::new(Arc::new(SiteProfile::linkedin()))
    }

    fn snap(url: &str, text: &str, on: &[&str]) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            text: text.to_string(),
            markers: on.iter().map(|m| (m.to_string(), true)).collect(),
        }
    }

    #[test]
    fn three_chrome_signals_mean_logged_in() {
        let v = detector().classify(&snap(
            "https://www.linkedin.com/feed/",
            "",
            &["nav_me", "nav_jobs", "feed_content"],
        ));
        assert_eq!(v.state, AuthState::LoggedIn);
        assert_eq!(v.nav_count, 3);
    }

    #[test]
    fn two_signals_are_not_enough() {
        let v = detector().classify(&snap(
            "https://www.linkedin.com/jobs/",
            "",
            &["nav_me", "nav_jobs"],
        ));
        assert_eq!(v.state, AuthState::LoggedOut);
    }

    #[test]
    fn login_url_or_form_vetoes_chrome_signals() {
        let d = detector();
        let many = ["nav_me", "nav_jobs", "nav_primary", "nav_messaging"];
        let v = d.classify(&snap("https://www.linkedin.com/login", "", &many));
        assert_eq!(v.state, AuthState::LoggedOut);

        let mut with_form = many.to_vec();
        with_form.push("login_form");
        let v = d.classify(&snap("https://www.linkedin.com/feed/", "", &with_form));
        assert_eq!(v.state, AuthState::LoggedOut);
    }

    #[test]
    fn greeting_on_home_is_sufficient() {
        let d = detector();
        let v = d.classify(&snap("https://www.linkedin.com/", "Good morning, Sam", &[]));
        assert_eq!(v.state, AuthState::LoggedIn);

        let v = d.classify(&snap("https://www.linkedin.com/jobs/", "Good morning, Sam", &[]));
        assert_eq!(v.state, AuthState::LoggedOut);
    }

    #[test]
    fn challenge_wins_over_login_signals() {
        let v = detector().classify(&snap(
            "https://www.linkedin.com/feed/",
            "Let's do a quick Security Verification",
            &["nav_me", "nav_jobs", "feed_content", "nav_primary"],
        ));
        assert_eq!(v.state, AuthState::Challenged);
        assert_eq!(
            v.challenge_message.as_deref(),
            Some("security alert: \"security verification\"")
        );
    }

    #[test]
    fn challenge_element_alone_triggers() {
        let v = detector().classify(&snap(
            "https://www.linkedin.com/checkpoint/challenge",
            "",
            &["challenge:[data-sitekey]"],
        ));
        assert!(v.is_challenged());
        assert!(v.signal("challenge_element"));
    }

    #[test]
    fn sign_in_link_is_diagnostic_only() {
        let v = detector().classify(&snap(
            "https://www.linkedin.com/feed/",
            "Join now Sign in",
            &["nav_me", "nav_jobs", "feed_content", "sign_in_link"],
        ));
        assert_eq!(v.state, AuthState::LoggedIn);
        assert!(v.signal("sign_in_link"));
        assert!(v.signal("guest_text"));
    }

    #[test]
    fn probe_is_read_only_and_lists_all_groups() {
        let d = detector();
        assert!(d.probe.starts_with("// probe:auth"));
        assert!(d.probe.contains("global-nav__me-photo"));
        assert!(d.probe.contains("challenge:#captcha"));
        assert!(!d.probe.contains(".click()"));
    }
}
