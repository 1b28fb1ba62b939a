pub mod api;
pub mod automation;
pub mod browser;
pub mod core;
pub mod scheduler;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::{AppState, AutomationError, ConfigStore, FailureReason, Settings};

pub use automation::{AuthenticationDetector, PostComposer, PostPipeline, SiteProfile};
pub use browser::{BrowserSession, PageDriver, WaitPolicy};
pub use scheduler::PostScheduler;
