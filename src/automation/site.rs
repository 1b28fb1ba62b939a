//! Everything site-specific: URLs, DOM markers, phrases and locator chains.
//!
//! Selectors churn; keep them here so the detector and composer stay generic.

use crate::automation::locator::{LocatorChain, LocatorStrategy};
use serde::{Deserialize, Serialize};
use url::Url;

/// A named boolean signal: true when any of `selectors` matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalProbe {
    pub name: String,
    pub selectors: Vec<String>,
}

impl SignalProbe {
    pub fn new(name: &str, selectors: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposerChains {
    pub open_composer: LocatorChain,
    pub composer_surface: LocatorChain,
    pub text_input: LocatorChain,
    pub media_button: LocatorChain,
    pub advance_media: LocatorChain,
    pub close_dialog: LocatorChain,
    pub submit: LocatorChain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationMarkers {
    pub toast: String,
    pub feed_item: String,
    pub live_region: String,
    /// Lower-case words that mark a live-region announcement as success.
    pub success_words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub home_url: String,
    pub feed_url: String,
    pub login_url: String,

    pub login_url_markers: Vec<String>,
    pub checkpoint_url_markers: Vec<String>,
    pub home_url_markers: Vec<String>,

    /// Signals counted toward the navigation-chrome threshold.
    pub chrome_signals: Vec<SignalProbe>,
    pub chrome_threshold: usize,
    pub login_form: SignalProbe,
    /// Recorded for diagnostics only; never decides the verdict.
    pub sign_in_link: SignalProbe,
    pub greeting_phrases: Vec<String>,
    pub guest_phrases: Vec<String>,

    pub challenge_selectors: Vec<String>,
    pub challenge_phrases: Vec<String>,

    pub chains: ComposerChains,
    pub file_input: String,
    pub attached_media: Vec<String>,
    pub media_editor: Vec<String>,
    pub dialogs: Vec<String>,
    pub backdrop: String,
    pub backdrop_click: (f64, f64),
    /// Marks the composer's own editor so dismissal never targets it.
    pub editor_marker: String,
    pub confirmation: ConfirmationMarkers,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl SiteProfile {
    pub fn linkedin() -> Self {
        let css = LocatorStrategy::css;

        let open_composer = LocatorChain::new(
            "start-post button",
            vec![
                LocatorStrategy::text("button", "Start a post"),
                css(".share-box-feed-entry__trigger"),
                css("[aria-placeholder='Start a post']"),
                css("[placeholder='Start a post']"),
                css("button[aria-label='Start a post']"),
                css("div[aria-label='Start a post']"),
                css("div[data-control-name='share.sharebox_focus']"),
                css("button.share-box__open"),
                css(".artdeco-card .share-box-feed-entry"),
                LocatorStrategy::text_contains("button", "Start a post"),
                LocatorStrategy::band("button[id^='ember']", 0.0, 400.0),
                LocatorStrategy::point(650.0, 300.0),
                LocatorStrategy::viewport_center(0.0, -100.0),
            ],
        );

        let composer_surface = LocatorChain::new(
            "composer surface",
            vec![
                css("div.share-box-update"),
                css("div[role='dialog'] div[role='textbox']"),
            ],
        );

        let text_input = LocatorChain::new(
            "post text editor",
            vec![
                css("div[role='dialog'] div[role='textbox']"),
                css("div[role='textbox']"),
                css(".editor-content div[contenteditable='true']"),
                css("div[aria-label='Text editor for creating content']"),
                css("div.ql-editor"),
            ],
        );

        let media_button = LocatorChain::new(
            "add-media button",
            vec![
                css("button[aria-label='Add a photo']"),
                css("button[aria-label='Add media']"),
                css("button[aria-label='Add image']"),
                LocatorStrategy::text_contains("button", "Add media"),
                LocatorStrategy::text_contains("button", "Add a photo"),
                LocatorStrategy::text_contains("button", "Photo"),
            ],
        );

        let advance_media = LocatorChain::new(
            "media editor advance",
            vec![
                LocatorStrategy::text("div[role='dialog'] button", "Next"),
                LocatorStrategy::text("div[role='dialog'] button", "Done"),
                css("button.share-box-footer__primary-btn"),
                css(".image-sharing-detour-container button.artdeco-button--primary"),
            ],
        );

        let close_dialog = LocatorChain::new(
            "leftover dialog close",
            vec![
                css(".artdeco-modal:not(:has([role='textbox'])) button[aria-label='Dismiss']"),
                css("div[role='dialog']:not(:has([role='textbox'])) button[aria-label='Close']"),
                css("div[role='dialog']:not(:has([role='textbox'])) button[aria-label='Cancel']"),
                css("button.media-upload-cancel"),
                css(".artdeco-modal:not(:has([role='textbox'])) .artdeco-modal__dismiss"),
                css(".artdeco-modal:not(:has([role='textbox'])) .artdeco-modal__close"),
            ],
        );

        let submit = LocatorChain::new(
            "post submit button",
            vec![
                LocatorStrategy::text("div[role='dialog'] button", "Post"),
                css("button[aria-label='Post']"),
                css("button.share-actions__primary-action"),
                css("button.share-box_actions__primary-action"),
                css("button[data-control-name='share.post']"),
                css("button.share-actions__publish-button"),
                css("div[role='dialog'] button.artdeco-button--primary"),
                LocatorStrategy::text("div[role='dialog'] button", "Share"),
                LocatorStrategy::text("div[role='dialog'] button", "Share post"),
                LocatorStrategy::text("div[role='dialog'] button", "Publish"),
                css(".share-actions button.artdeco-button--primary"),
                css(".share-box-footer button.artdeco-button--primary"),
                LocatorStrategy::rightmost(".share-box_actions button, .share-box-footer button, .editor-footer button"),
            ],
        );

        Self {
            home_url: "https://www.linkedin.com/".into(),
            feed_url: "https://www.linkedin.com/feed/".into(),
            login_url: "https://www.linkedin.com/login".into(),
            login_url_markers: strings(&["/login", "/uas/login", "/signup"]),
            checkpoint_url_markers: strings(&["/checkpoint", "/authwall"]),
            home_url_markers: strings(&["linkedin.com/feed"]),
            chrome_signals: vec![
                SignalProbe::new("nav_profile_photo", &[".global-nav__me-photo"]),
                SignalProbe::new("nav_me", &[".global-nav__me"]),
                SignalProbe::new("nav_primary", &[".global-nav__primary-items"]),
                SignalProbe::new("nav_network", &["a[href='/mynetwork/']", "a[href*='/mynetwork/']"]),
                SignalProbe::new("nav_jobs", &["a[href='/jobs/']", "a[href*='/jobs/']"]),
                SignalProbe::new("nav_messaging", &["a[href='/messaging/']", "a[href*='/messaging/']"]),
                SignalProbe::new("feed_content", &[".feed-shared-update-v2", ".feed-shared-news-module"]),
                SignalProbe::new(
                    "post_box",
                    &[
                        "[data-control-name='share.sharebox_focus']",
                        ".share-box-feed-entry__trigger",
                    ],
                ),
            ],
            chrome_threshold: 3,
            login_form: SignalProbe::new(
                "login_form",
                &["#username", "input[name='session_key']", ".login__form"],
            ),
            sign_in_link: SignalProbe::new(
                "sign_in_link",
                &[
                    "a[data-tracking-control-name='guest_homepage-basic_sign-in-link']",
                    "a.nav__button-secondary",
                ],
            ),
            greeting_phrases: strings(&[
                "Welcome Back",
                "Good morning",
                "Good afternoon",
                "Good evening",
            ]),
            guest_phrases: strings(&["Join now", "Sign in"]),
            challenge_selectors: strings(&[
                ".recaptcha-checkbox",
                ".recaptcha-container",
                "[data-sitekey]",
                "#captcha",
                "#error-for-password",
                ".security-challenge",
                "input[name='security_challenge_id']",
                ".org-captcha__form",
                "#challenge-error-page",
                "form.challenge-form",
                ".authentication-spinner-redirect",
                ".challenge-dialog",
            ]),
            challenge_phrases: strings(&[
                "browser or app may not be secure",
                "this browser is not supported",
                "security verification",
                "verify your identity",
                "unusual login activity",
                "we noticed some unusual activity",
                "please verify",
                "security challenge",
                "CAPTCHA",
                "are you a robot",
                "try using a different browser",
            ]),
            chains: ComposerChains {
                open_composer,
                composer_surface,
                text_input,
                media_button,
                advance_media,
                close_dialog,
                submit,
            },
            file_input: "input[type='file']".into(),
            attached_media: strings(&[
                ".share-images__image-loaded",
                "img[alt='Attached image']",
                ".image-sharing-attachment",
                ".editor-image",
                ".editor-media",
                ".editor-content img",
                ".editor-content video",
            ]),
            media_editor: strings(&[
                ".image-sharing-detour-container",
                ".share-media-editor",
                "div[role='dialog'] .image-editor",
            ]),
            dialogs: strings(&["div[role='dialog']", ".artdeco-modal"]),
            backdrop: ".artdeco-modal-overlay".into(),
            backdrop_click: (10.0, 10.0),
            editor_marker: "[role='textbox'], [contenteditable='true']".into(),
            confirmation: ConfirmationMarkers {
                toast: "div.artdeco-toast-item--visible".into(),
                feed_item: ".feed-shared-update-v2".into(),
                live_region: "div[aria-live='assertive']".into(),
                success_words: strings(&["posted", "shared", "success"]),
            },
        }
    }

    pub fn is_login_url(&self, url: &str) -> bool {
        let path = url_path(url);
        self.login_url_markers.iter().any(|m| path.starts_with(m.as_str()))
    }

    pub fn is_checkpoint_url(&self, url: &str) -> bool {
        let path = url_path(url);
        self.checkpoint_url_markers
            .iter()
            .any(|m| path.starts_with(m.as_str()))
    }

    /// Feed URLs and the bare home URL count as home-shaped.
    pub fn is_home_url(&self, url: &str) -> bool {
        if let (Ok(u), Ok(home)) = (Url::parse(url), Url::parse(&self.home_url)) {
            if u.host_str() == home.host_str() && u.path() == "/" {
                return true;
            }
        }
        self.home_url_markers.iter().any(|m| url.contains(m.as_str()))
    }
}

/// Path of `url`, or the raw string when it does not parse.
fn url_path(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self::linkedin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_shapes() {
        let p = SiteProfile::linkedin();
        assert!(p.is_home_url("https://www.linkedin.com/"));
        assert!(p.is_home_url("https://www.linkedin.com/feed/?trk=x"));
        assert!(!p.is_home_url("https://www.linkedin.com/jobs/"));
        assert!(p.is_login_url("https://www.linkedin.com/login?session_redirect=x"));
        assert!(p.is_checkpoint_url("https://www.linkedin.com/checkpoint/challenge/abc"));
        assert!(!p.is_login_url("https://www.linkedin.com/feed/?trk=/login"));
        assert!(p.is_home_url("https://www.linkedin.com"));
    }

    #[test]
    fn chains_degrade_toward_coordinates() {
        let p = SiteProfile::linkedin();
        let open = &p.chains.open_composer.strategies;
        assert!(open.len() > 5);
        assert!(open.last().unwrap().name.starts_with("viewport centre"));
        assert_eq!(p.chrome_signals.len(), 8);
    }

    #[test]
    fn profile_round_trips_through_json() {
        let p = SiteProfile::linkedin();
        let json = serde_json::to_string(&p).unwrap();
        let back: SiteProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
