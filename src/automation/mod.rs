pub mod auth;
pub mod composer;
pub mod locator;
pub mod login;
pub mod pipeline;
pub mod site;

pub use auth::AuthenticationDetector;
pub use composer::{ComposeFailure, ComposeOutcome, ComposerSettings, ComposerState, PostComposer};
pub use locator::{Activation, ElementLocator, LocatorChain, LocatorStrategy};
pub use pipeline::{BrowserPipeline, PostPipeline};
pub use site::SiteProfile;

use rand::prelude::*;
use std::time::Duration;

/// Inclusive millisecond bounds for a randomized human-like pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl PauseRange {
    pub const NONE: PauseRange = PauseRange { min_ms: 0, max_ms: 0 };

    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn draw(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(self.min_ms..=self.max_ms))
    }
}

pub(crate) async fn human_pause(range: PauseRange) {
    let d = range.draw();
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_draw_stays_in_bounds() {
        let r = PauseRange::new(100, 200);
        for _ in 0..200 {
            let d = r.draw().as_millis() as u64;
            assert!((100..=200).contains(&d));
        }
        assert!(PauseRange::NONE.draw().is_zero());
    }
}
