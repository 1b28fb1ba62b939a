use crate::browser::driver::PageDriver;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Best-effort page captures (PNG + HTML) written at composer milestones.
///
/// Every failure here is logged and swallowed; a capture never changes the
/// outcome of the step that requested it.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    dir: Option<PathBuf>,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn from_option(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Writes `<label>_<timestamp>.png` and `.html`. Returns the PNG path when
    /// the screenshot was saved.
    pub async fn capture(&self, driver: &dyn PageDriver, label: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("diagnostics: cannot create {}: {}", dir.display(), e);
            return None;
        }
        let stem = format!(
            "{}_{}",
            sanitize_label(label),
            chrono::Local::now().format("%Y%m%d_%H%M%S_%3f")
        );

        match driver.html().await {
            Ok(html) => {
                let path = dir.join(format!("{stem}.html"));
                if let Err(e) = tokio::fs::write(&path, html).await {
                    warn!("diagnostics: failed to write {}: {}", path.display(), e);
                }
            }
            Err(e) => debug!("diagnostics: html capture failed: {}", e),
        }

        match driver.screenshot().await {
            Ok(bytes) => {
                let path = dir.join(format!("{stem}.png"));
                match tokio::fs::write(&path, bytes).await {
                    Ok(()) => {
                        debug!("diagnostics: saved {}", path.display());
                        Some(path)
                    }
                    Err(e) => {
                        warn!("diagnostics: failed to write {}: {}", path.display(), e);
                        None
                    }
                }
            }
            Err(e) => {
                debug!("diagnostics: screenshot failed: {}", e);
                None
            }
        }
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_filesystem_safe() {
        assert_eq!(sanitize_label("after submit/2"), "after_submit_2");
    }

    #[test]
    fn disabled_has_no_dir() {
        assert!(Diagnostics::disabled().dir().is_none());
        assert!(Diagnostics::from_option(None).dir().is_none());
    }
}
