// Manual smoke test against a real Chrome and the live site.
//
// Ignored by default because it launches a browser, reuses (or creates) a
// persistent profile and talks to linkedin.com. It never posts anything.
//
// Run:
//   cargo test --test live_session_manual -- --ignored --nocapture
//
// Optional env vars:
//   POSTPILOT_PROFILE_DIR=/path/to/profile   (defaults to a temp dir)
//   POSTPILOT_HEADLESS=1

use postpilot::browser::{BrowserSession, PageDriver, SessionConfig, WaitPolicy};
use postpilot::{AuthenticationDetector, SiteProfile};
use std::sync::Arc;
use std::time::Duration;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

#[tokio::test]
#[ignore]
async fn manual_launch_and_detect_login_state() {
    init_logger();

    let profile_dir = std::env::var("POSTPILOT_PROFILE_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("postpilot-live-profile"));
    let mut config = SessionConfig::new(&profile_dir, postpilot::core::config::DEFAULT_USER_AGENT);
    config.headless = std::env::var("POSTPILOT_HEADLESS").is_ok();

    let mut session = BrowserSession::new(config);
    session.ensure_ready().await.expect("browser should launch");
    assert!(session.is_initialized());

    session
        .navigate("about:blank", WaitPolicy::Load, Duration::from_secs(10))
        .await
        .expect("blank page");
    let webdriver = session
        .evaluate("navigator.webdriver === true")
        .await
        .expect("evaluate");
    assert_eq!(webdriver, serde_json::Value::Bool(false));

    let detector = AuthenticationDetector::new(Arc::new(SiteProfile::linkedin()));
    let verdict = detector.check(&session).await.expect("auth check");
    println!("\nverdict: {:?}", verdict.state);
    println!("signals: {:?}", verdict.signals);
    if let Some(msg) = &verdict.challenge_message {
        println!("challenge: {msg}");
    }

    session.close().await;
    assert!(!session.is_initialized());
}
