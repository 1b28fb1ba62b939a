use crate::automation::auth::AuthenticationDetector;
use crate::automation::composer::{ComposeFailure, ComposeOutcome, PostComposer};
use crate::browser::session::BrowserSession;
use crate::core::error::AutomationError;
use crate::core::types::AuthVerdict;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// What the scheduler needs from the browser side: an auth gate and a way
/// to publish. Tests plug in scripted implementations.
#[async_trait]
pub trait PostPipeline: Send + Sync {
    async fn check_authentication(&self) -> Result<AuthVerdict, AutomationError>;

    async fn publish(
        &self,
        text: &str,
        media: &[PathBuf],
        cancel: &watch::Receiver<bool>,
    ) -> Result<ComposeOutcome, ComposeFailure>;
}

/// Runs detector and composer against the shared browser session. The
/// session mutex serializes every page interaction.
pub struct BrowserPipeline {
    session: Arc<Mutex<BrowserSession>>,
    detector: AuthenticationDetector,
    composer: PostComposer,
}

impl BrowserPipeline {
    pub fn new(
        session: Arc<Mutex<BrowserSession>>,
        detector: AuthenticationDetector,
        composer: PostComposer,
    ) -> Self {
        Self {
            session,
            detector,
            composer,
        }
    }
}

#[async_trait]
impl PostPipeline for BrowserPipeline {
    async fn check_authentication(&self) -> Result<AuthVerdict, AutomationError> {
        let mut session = self.session.lock().await;
        session.ensure_ready().await?;
        self.detector.check(&*session).await
    }

    async fn publish(
        &self,
        text: &str,
        media: &[PathBuf],
        cancel: &watch::Receiver<bool>,
    ) -> Result<ComposeOutcome, ComposeFailure> {
        let mut session = self.session.lock().await;
        if let Err(e) = session.ensure_ready().await {
            return Err(ComposeFailure {
                reason: e.failure_reason(),
                message: e.to_string(),
                trail: Vec::new(),
            });
        }
        self.composer.compose(&*session, text, media, cancel).await
    }
}
