//! Persistent settings document.
//!
//! Stored as `~/.postpilot/config.json` (override with `POSTPILOT_CONFIG`).
//! The document holds user settings plus the append-only history and error
//! logs. Missing keys fall back to defaults, unknown keys survive write-back,
//! and every write goes through a temp file + rename so readers never see a
//! partial document.

use crate::core::error::AutomationError;
use crate::core::types::{ErrorEntry, HistoryEntry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

// ─────────────────────────────────────────────────────────────────────────────
// Document
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_user_data_dir")]
    pub user_data_dir: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_interval")]
    pub posting_interval_minutes: u32,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub skip_media: bool,
    #[serde(default = "default_diagnostics_dir")]
    pub diagnostics_dir: String,
    #[serde(default = "default_true")]
    pub diagnostics_enabled: bool,
    /// When set, a submit with no confirmation signal still counts as published.
    #[serde(default)]
    pub treat_unconfirmed_as_success: bool,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    /// Keys this version does not know about; written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_user_data_dir() -> String {
    "~/.postpilot/browser".to_string()
}

fn default_diagnostics_dir() -> String {
    "~/.postpilot/debug".to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_data_dir: default_user_data_dir(),
            user_agent: default_user_agent(),
            posting_interval_minutes: default_interval(),
            headless: false,
            skip_media: false,
            diagnostics_dir: default_diagnostics_dir(),
            diagnostics_enabled: true,
            treat_unconfirmed_as_success: false,
            history: Vec::new(),
            errors: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub fn profile_dir(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.user_data_dir))
    }

    pub fn diagnostics_path(&self) -> Option<PathBuf> {
        self.diagnostics_enabled
            .then(|| PathBuf::from(expand_tilde(&self.diagnostics_dir)))
    }
}

pub fn expand_tilde(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    raw.to_string()
}

/// `$POSTPILOT_CONFIG`, else `~/.postpilot/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("POSTPILOT_CONFIG") {
        let p = p.trim();
        if !p.is_empty() {
            return Some(PathBuf::from(expand_tilde(p)));
        }
    }
    dirs::home_dir().map(|h| h.join(".postpilot").join("config.json"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Settings plus history/error logs, written back on every mutation.
///
/// A store without a path keeps everything in memory.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    doc: Mutex<Settings>,
}

impl ConfigStore {
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            doc: Mutex::new(settings),
        }
    }

    /// Loads the document at `path`. A missing file is created with defaults;
    /// an unreadable one is logged and replaced by defaults in memory.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = load_settings(&path);
        let store = Self {
            path: Some(path.clone()),
            doc: Mutex::new(settings),
        };
        if !path.exists() {
            if let Err(e) = store.persist() {
                warn!("config: failed to write defaults to {}: {}", path.display(), e);
            } else {
                info!("config: created {}", path.display());
            }
        }
        store
    }

    pub fn open_default() -> Self {
        match default_config_path() {
            Some(path) => Self::open(path),
            None => {
                warn!("config: cannot locate home directory, settings kept in memory only");
                Self::in_memory(Settings::default())
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    /// Reads one value without cloning the whole document.
    pub fn read<T>(&self, f: impl FnOnce(&Settings) -> T) -> T {
        f(&self.lock())
    }

    pub fn interval_minutes(&self) -> u32 {
        self.lock().posting_interval_minutes
    }

    pub fn set_interval_minutes(&self, minutes: u32) -> Result<(), AutomationError> {
        if minutes == 0 {
            return Err(AutomationError::InvalidInput(
                "posting interval must be at least 1 minute".into(),
            ));
        }
        self.update(|s| s.posting_interval_minutes = minutes)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.lock().history.clone()
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.lock().errors.clone()
    }

    pub fn append_history(&self, entry: HistoryEntry) -> Result<(), AutomationError> {
        self.update(|s| s.history.push(entry))
    }

    pub fn append_error(&self, entry: ErrorEntry) -> Result<(), AutomationError> {
        self.update(|s| s.errors.push(entry))
    }

    pub fn clear_history(&self) -> Result<(), AutomationError> {
        self.update(|s| s.history.clear())
    }

    pub fn clear_errors(&self) -> Result<(), AutomationError> {
        self.update(|s| s.errors.clear())
    }

    /// Applies `f` to the document and writes it back.
    pub fn update<F>(&self, f: F) -> Result<(), AutomationError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut doc = self.lock();
        f(&mut doc);
        self.write(&doc)
    }

    fn persist(&self) -> Result<(), AutomationError> {
        let doc = self.lock();
        self.write(&doc)
    }

    /// Callers hold the document lock, so the file only ever moves forward
    /// and the temp file has a single writer.
    fn write(&self, settings: &Settings) -> Result<(), AutomationError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Settings> {
        // A poisoned lock still holds a consistent document: every mutation is
        // a single closure applied under the guard.
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!("config: failed to read {}: {}", path.display(), e);
            return Settings::default();
        }
    };
    match serde_json::from_str::<Settings>(&content) {
        Ok(s) => s,
        Err(e) => {
            warn!(
                "config: failed to parse {}: {}; using defaults",
                path.display(),
                e
            );
            Settings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PostRequest;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("postpilot-config-{}", uuid::Uuid::new_v4()));
        dir.join(name)
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let s: Settings = serde_json::from_str(r#"{"headless": true}"#).unwrap();
        assert!(s.headless);
        assert_eq!(s.posting_interval_minutes, DEFAULT_INTERVAL_MINUTES);
        assert_eq!(s.user_agent, DEFAULT_USER_AGENT);
        assert!(s.diagnostics_enabled);
        assert!(s.history.is_empty());
    }

    #[test]
    fn open_creates_file_and_preserves_unknown_keys() {
        let path = temp_path("config.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"posting_interval_minutes": 30, "theme": "dark"}"#).unwrap();

        let store = ConfigStore::open(&path);
        assert_eq!(store.interval_minutes(), 30);
        store.set_interval_minutes(45).unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["posting_interval_minutes"], 45);
        assert_eq!(raw["theme"], "dark");
        assert!(!path.with_extension("tmp").exists());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let path = temp_path("fresh.json");
        let store = ConfigStore::open(&path);
        assert!(path.exists());
        assert_eq!(store.interval_minutes(), DEFAULT_INTERVAL_MINUTES);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let path = temp_path("broken.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        let store = ConfigStore::open(&path);
        assert_eq!(store.interval_minutes(), DEFAULT_INTERVAL_MINUTES);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn history_and_errors_append_and_clear_independently() {
        let store = ConfigStore::in_memory(Settings::default());
        let req = PostRequest::new("hello world", vec![]).unwrap();
        store.append_history(HistoryEntry::published(&req)).unwrap();
        store.append_error(ErrorEntry::new("boom")).unwrap();
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.errors().len(), 1);

        store.clear_history().unwrap();
        assert!(store.history().is_empty());
        assert_eq!(store.errors().len(), 1);
    }

    #[test]
    fn concurrent_appends_all_reach_the_file() {
        let path = temp_path("busy.json");
        let store = ConfigStore::open(&path);

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for n in 0..200 {
                        store
                            .append_error(ErrorEntry::new(format!("worker {worker} error {n}")))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(store.errors().len(), 800);
        let on_disk: Settings = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.errors.len(), 800);
        assert!(!path.with_extension("tmp").exists());

        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn zero_interval_is_rejected() {
        let store = ConfigStore::in_memory(Settings::default());
        assert!(store.set_interval_minutes(0).is_err());
        assert_eq!(store.interval_minutes(), DEFAULT_INTERVAL_MINUTES);
    }
}
