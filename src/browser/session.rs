//! One long-lived Chromium instance bound to a persistent profile directory.
//!
//! The session is launched lazily by [`BrowserSession::ensure_ready`] and
//! relaunched transparently if the browser goes away (crash, user closed the
//! window). Cookies live in the profile directory, so a relaunch keeps the
//! login.

use crate::browser::driver::{Key, PageDriver, WaitPolicy};
use crate::browser::stealth;
use crate::core::error::AutomationError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, NavigateParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Files Chromium leaves behind after an unclean exit. Any of them makes the
/// next launch against the same profile hang or refuse to start.
pub const LOCK_ARTIFACTS: &[&str] = &[
    "SingletonLock",
    "SingletonCookie",
    "SingletonSocket",
    "CrashpadMetrics.pma",
    "Local State.bad",
];

const READY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub profile_dir: PathBuf,
    pub user_agent: String,
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    /// Explicit browser binary; discovered when `None`.
    pub executable: Option<String>,
    pub languages: Vec<String>,
    /// Upper bound for every CDP command other than navigation, which takes
    /// its own timeout.
    pub command_timeout: Duration,
}

impl SessionConfig {
    pub fn new(profile_dir: impl Into<PathBuf>, user_agent: impl Into<String>) -> Self {
        Self {
            profile_dir: profile_dir.into(),
            user_agent: user_agent.into(),
            headless: false,
            width: 1280,
            height: 800,
            executable: None,
            languages: vec!["en-US".into(), "en".into()],
            command_timeout: Duration::from_secs(30),
        }
    }
}

pub struct BrowserSession {
    config: SessionConfig,
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

impl BrowserSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            browser: None,
            page: None,
            handler_task: None,
            closed: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn profile_dir(&self) -> &Path {
        &self.config.profile_dir
    }

    /// True while a page is open and the CDP connection is alive.
    pub fn is_initialized(&self) -> bool {
        self.page.is_some() && !self.closed.load(Ordering::SeqCst)
    }

    /// Launches the browser if it is not running. Idempotent.
    pub async fn ensure_ready(&mut self) -> Result<(), AutomationError> {
        if self.is_initialized() {
            return Ok(());
        }
        if self.browser.is_some() {
            info!("session: browser went away, relaunching");
            self.close().await;
        }
        self.launch().await
    }

    async fn launch(&mut self) -> Result<(), AutomationError> {
        let profile_dir = self.config.profile_dir.clone();
        std::fs::create_dir_all(&profile_dir)?;

        if profile_in_use(&profile_dir) {
            return Err(AutomationError::BrowserLaunch(format!(
                "profile directory {} is in use by another browser process",
                profile_dir.display()
            )));
        }
        remove_lock_artifacts(&profile_dir);

        let exe = self
            .config
            .executable
            .clone()
            .or_else(find_chrome_executable)
            .ok_or_else(|| {
                AutomationError::BrowserLaunch(
                    "no Chromium-family browser found; install Chrome/Chromium or set CHROME_EXECUTABLE"
                        .into(),
                )
            })?;

        info!(
            "session: launching {} (profile {}, headless={})",
            exe,
            profile_dir.display(),
            self.config.headless
        );

        let browser_config = self.build_config(&exe)?;
        let (browser, handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AutomationError::BrowserLaunch(format!("{} ({})", e, exe)))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let page = match browser.new_page("about:blank").await {
            Ok(p) => p,
            Err(e) => {
                handler_task.abort();
                return Err(AutomationError::BrowserLaunch(format!(
                    "failed to open page: {}",
                    e
                )));
            }
        };

        let langs: Vec<&str> = self.config.languages.iter().map(String::as_str).collect();
        if let Err(e) = page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                stealth::init_script(&langs, stealth::profile_seed(&self.config.profile_dir)),
            ))
            .await
        {
            warn!("session: failed to install init script (continuing): {}", e);
        }

        self.browser = Some(browser);
        self.page = Some(page);
        self.handler_task = Some(handler_task);
        self.closed = closed;
        info!("session: ready");
        Ok(())
    }

    fn build_config(&self, exe: &str) -> Result<BrowserConfig, AutomationError> {
        let c = &self.config;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(exe)
            .user_data_dir(&c.profile_dir)
            .disable_default_args()
            .viewport(Viewport {
                width: c.width,
                height: c.height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(c.width, c.height)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--password-store=basic")
            .arg("--disable-features=Translate")
            .arg(format!("--lang={}", c.languages.first().map(String::as_str).unwrap_or("en-US")))
            .arg(format!("--user-agent={}", c.user_agent));

        if !c.headless {
            builder = builder.with_head();
        }

        builder
            .build()
            .map_err(|e| AutomationError::BrowserLaunch(format!("invalid browser config: {}", e)))
    }

    /// Closes the browser. Safe to call when nothing is running.
    pub async fn close(&mut self) {
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("session: close error (non-fatal): {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("session: wait error (non-fatal): {}", e);
            }
            info!("session: browser closed");
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Closes the browser and wipes the profile directory (cookies included).
    pub async fn clear_session_data(&mut self) -> Result<(), AutomationError> {
        self.close().await;
        let dir = self.config.profile_dir.clone();
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        info!("session: cleared profile {}", dir.display());
        Ok(())
    }

    fn page(&self) -> Result<&Page, AutomationError> {
        match &self.page {
            Some(p) if !self.closed.load(Ordering::SeqCst) => Ok(p),
            _ => Err(AutomationError::SessionNotReady),
        }
    }

    async fn wait_ready_state(page: &Page, accepted: &[&str]) -> Result<(), AutomationError> {
        loop {
            let state = page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|r| r.value().and_then(|v| v.as_str().map(str::to_string)));
            if let Some(state) = state {
                if accepted.contains(&state.as_str()) {
                    return Ok(());
                }
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        if let Some(mut browser) = self.browser.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = browser.close().await;
                    let _ = browser.wait().await;
                });
            }
        }
    }
}

fn nav_error(url: &str, reason: impl ToString) -> AutomationError {
    AutomationError::Navigation {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

fn eval_error(e: impl ToString) -> AutomationError {
    AutomationError::Evaluation(e.to_string())
}

/// Runs one page command under `limit`.
async fn bounded<T, F>(limit: Duration, what: &str, work: F) -> Result<T, AutomationError>
where
    F: std::future::Future<Output = Result<T, AutomationError>>,
{
    tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
        Err(AutomationError::Evaluation(format!(
            "{what} timed out after {}ms",
            limit.as_millis()
        )))
    })
}

#[async_trait]
impl PageDriver for BrowserSession {
    async fn navigate(
        &self,
        url: &str,
        policy: WaitPolicy,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        let page = self.page()?;
        let work = async {
            match policy {
                WaitPolicy::Load => {
                    page.goto(url).await.map_err(|e| nav_error(url, e))?;
                }
                WaitPolicy::DomContentLoaded | WaitPolicy::Commit => {
                    let resp = page
                        .execute(NavigateParams::new(url))
                        .await
                        .map_err(|e| nav_error(url, e))?;
                    if let Some(err) = resp.result.error_text.as_ref() {
                        return Err(nav_error(url, err));
                    }
                    if policy == WaitPolicy::DomContentLoaded {
                        Self::wait_ready_state(page, &["interactive", "complete"]).await?;
                    }
                }
            }
            Ok(())
        };
        match tokio::time::timeout(timeout, work).await {
            Ok(res) => res,
            Err(_) => Err(nav_error(
                url,
                format!("timed out after {}ms ({:?})", timeout.as_millis(), policy),
            )),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, AutomationError> {
        let page = self.page()?;
        bounded(self.config.command_timeout, "evaluate", async {
            let result = page.evaluate(script).await.map_err(eval_error)?;
            Ok(result.value().cloned().unwrap_or(Value::Null))
        })
        .await
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        let page = self.page()?;
        bounded(self.config.command_timeout, "click", async {
            page.click(Point { x, y }).await.map_err(eval_error)?;
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: Key) -> Result<(), AutomationError> {
        let page = self.page()?;
        bounded(self.config.command_timeout, "key press", async {
            for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
                let params = DispatchKeyEventParams::builder()
                    .r#type(kind)
                    .key(key.name())
                    .code(key.name())
                    .windows_virtual_key_code(key.virtual_code())
                    .native_virtual_key_code(key.virtual_code())
                    .build()
                    .map_err(eval_error)?;
                page.execute(params).await.map_err(eval_error)?;
            }
            Ok(())
        })
        .await
    }

    async fn insert_text(&self, text: &str) -> Result<(), AutomationError> {
        let page = self.page()?;
        bounded(self.config.command_timeout, "text insert", async {
            page.execute(InsertTextParams::new(text))
                .await
                .map_err(eval_error)?;
            Ok(())
        })
        .await
    }

    async fn set_input_files(
        &self,
        selector: &str,
        files: &[PathBuf],
    ) -> Result<(), AutomationError> {
        let page = self.page()?;
        bounded(self.config.command_timeout, "file upload", async {
            let element = page
                .find_element(selector)
                .await
                .map_err(|_| AutomationError::ElementNotFound {
                    target: "file input".into(),
                    tried: selector.to_string(),
                })?;
            let paths: Vec<String> = files
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect();
            let params = SetFileInputFilesParams::builder()
                .files(paths)
                .backend_node_id(element.backend_node_id)
                .build()
                .map_err(eval_error)?;
            page.execute(params).await.map_err(eval_error)?;
            Ok(())
        })
        .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError> {
        let page = self.page()?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        bounded(self.config.command_timeout, "screenshot", async {
            page.screenshot(params).await.map_err(eval_error)
        })
        .await
    }

    async fn html(&self) -> Result<String, AutomationError> {
        let page = self.page()?;
        bounded(self.config.command_timeout, "page content", async {
            page.content().await.map_err(eval_error)
        })
        .await
    }
}

fn spawn_handler_task(mut handler: chromiumoxide::Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("session: CDP handler event error: {}", e);
            }
        }
        closed.store(true, Ordering::SeqCst);
        info!("session: CDP connection closed");
    })
}

/// Removes Chromium lock artifacts from `profile_dir`. Uses `symlink_metadata`
/// so dangling `SingletonLock` symlinks are caught too.
pub fn remove_lock_artifacts(profile_dir: &Path) -> usize {
    let mut removed = 0;
    for name in LOCK_ARTIFACTS {
        let path = profile_dir.join(name);
        if std::fs::symlink_metadata(&path).is_err() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("session: removed stale {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("session: failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}

/// True when a live process was started with this `--user-data-dir`.
fn profile_in_use(profile_dir: &Path) -> bool {
    use sysinfo::System;
    let flag = format!("--user-data-dir={}", profile_dir.display());
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    sys.processes().values().any(|p| {
        p.cmd()
            .iter()
            .any(|arg| arg.to_string_lossy() == flag.as_str())
    })
}

/// Binary names searched on `PATH`, Brave first.
const PATH_NAMES: &[&str] = &[
    "brave-browser",
    "brave",
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "microsoft-edge",
];

#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(target_os = "linux")]
const INSTALL_PATHS: &[&str] = &[
    "/usr/bin/brave-browser",
    "/snap/bin/brave",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/usr/bin/microsoft-edge",
];

#[cfg(target_os = "windows")]
const INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
const INSTALL_PATHS: &[&str] = &[];

/// Locates a Chromium-family browser: `CHROME_EXECUTABLE`, then `PATH`, then
/// the usual install locations.
pub fn find_chrome_executable() -> Option<String> {
    let from_env = std::env::var("CHROME_EXECUTABLE")
        .ok()
        .filter(|p| Path::new(p).exists());
    if from_env.is_some() {
        return from_env;
    }

    let on_path = std::env::var_os("PATH").and_then(|path_var| {
        std::env::split_paths(&path_var)
            .flat_map(|dir| PATH_NAMES.iter().map(move |name| dir.join(name)))
            .find(|full| full.exists())
    });
    if let Some(found) = on_path {
        return Some(found.to_string_lossy().to_string());
    }

    INSTALL_PATHS
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("postpilot-profile-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn removes_every_lock_artifact() {
        let dir = scratch_dir();
        for name in LOCK_ARTIFACTS {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        std::fs::write(dir.join("Cookies"), b"keep").unwrap();

        assert_eq!(remove_lock_artifacts(&dir), LOCK_ARTIFACTS.len());
        for name in LOCK_ARTIFACTS {
            assert!(std::fs::symlink_metadata(dir.join(name)).is_err());
        }
        assert!(dir.join("Cookies").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn removes_dangling_singleton_symlink() {
        let dir = scratch_dir();
        let lock = dir.join("SingletonLock");
        std::os::unix::fs::symlink("somehost-12345", &lock).unwrap();
        assert!(!lock.exists());

        assert_eq!(remove_lock_artifacts(&dir), 1);
        assert!(std::fs::symlink_metadata(&lock).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn brave_is_preferred_over_other_browsers() {
        assert!(PATH_NAMES[0].starts_with("brave"));
        if let Some(first) = INSTALL_PATHS.first() {
            assert!(first.to_lowercase().contains("brave"), "{first}");
        }
    }

    #[tokio::test]
    async fn stalled_page_command_times_out() {
        let result: Result<(), _> = bounded(
            Duration::from_millis(20),
            "evaluate",
            futures::future::pending(),
        )
        .await;
        match result {
            Err(AutomationError::Evaluation(msg)) => assert!(msg.contains("evaluate timed out"), "{msg}"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn fast_page_command_passes_through() {
        let value = bounded(Duration::from_secs(1), "evaluate", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn new_session_is_not_initialized() {
        let mut session = BrowserSession::new(SessionConfig::new(scratch_dir(), "ua"));
        assert!(!session.is_initialized());
        assert!(matches!(
            session.evaluate("1").await,
            Err(AutomationError::SessionNotReady)
        ));
        session.close().await;
        assert!(!session.is_initialized());
    }

    #[tokio::test]
    async fn clear_session_data_recreates_empty_profile() {
        let dir = scratch_dir();
        std::fs::write(dir.join("Cookies"), b"secret").unwrap();
        let mut session = BrowserSession::new(SessionConfig::new(&dir, "ua"));
        session.clear_session_data().await.unwrap();
        assert!(dir.exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
