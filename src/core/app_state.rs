use crate::automation::auth::AuthenticationDetector;
use crate::automation::composer::{ComposerSettings, PostComposer};
use crate::automation::login::{LoginOutcome, LoginPrompt};
use crate::automation::pipeline::{BrowserPipeline, PostPipeline};
use crate::automation::site::SiteProfile;
use crate::browser::diagnostics::Diagnostics;
use crate::browser::session::{BrowserSession, SessionConfig};
use crate::core::config::ConfigStore;
use crate::core::error::AutomationError;
use crate::core::types::AuthVerdict;
use crate::scheduler::{PostScheduler, SchedulerSettings};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Shared handles for the HTTP surface and the binary.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub profile: Arc<SiteProfile>,
    pub session: Arc<Mutex<BrowserSession>>,
    pub detector: AuthenticationDetector,
    pub scheduler: Arc<PostScheduler>,
    pub login_prompt: LoginPrompt,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.store.path())
            .field("scheduler_running", &self.scheduler.is_running())
            .finish()
    }
}

impl AppState {
    /// Wires the real browser pipeline from the stored settings.
    pub fn from_store(store: Arc<ConfigStore>) -> Self {
        let settings = store.snapshot();
        let profile = Arc::new(SiteProfile::linkedin());

        let mut session_config = SessionConfig::new(settings.profile_dir(), settings.user_agent.clone());
        session_config.headless = settings.headless;
        let session = Arc::new(Mutex::new(BrowserSession::new(session_config)));

        let detector = AuthenticationDetector::new(Arc::clone(&profile));
        let composer = PostComposer::new(
            Arc::clone(&profile),
            ComposerSettings {
                treat_unconfirmed_as_success: settings.treat_unconfirmed_as_success,
                ..ComposerSettings::default()
            },
        )
        .with_diagnostics(Diagnostics::from_option(settings.diagnostics_path()));

        let pipeline: Arc<dyn PostPipeline> = Arc::new(BrowserPipeline::new(
            Arc::clone(&session),
            detector.clone(),
            composer,
        ));
        let scheduler = PostScheduler::new(pipeline, Arc::clone(&store), SchedulerSettings::default());

        Self::new(store, profile, session, scheduler)
    }

    pub fn new(
        store: Arc<ConfigStore>,
        profile: Arc<SiteProfile>,
        session: Arc<Mutex<BrowserSession>>,
        scheduler: Arc<PostScheduler>,
    ) -> Self {
        let detector = AuthenticationDetector::new(Arc::clone(&profile));
        Self {
            store,
            profile,
            session,
            detector,
            scheduler,
            login_prompt: LoginPrompt::default(),
        }
    }

    pub async fn check_authentication(&self) -> Result<AuthVerdict, AutomationError> {
        let mut session = self.session.lock().await;
        session.ensure_ready().await?;
        self.detector.check(&*session).await
    }

    /// Holds the session lock for the whole wait; the scheduler cannot touch
    /// the page until sign-in finishes or times out.
    pub async fn prompt_login(&self) -> Result<LoginOutcome, AutomationError> {
        let mut session = self.session.lock().await;
        session.ensure_ready().await?;
        self.login_prompt.run(&self.detector, &*session).await
    }

    pub async fn clear_session_data(&self) -> Result<(), AutomationError> {
        self.session.lock().await.clear_session_data().await
    }

    pub async fn close_session(&self) {
        self.session.lock().await.close().await;
    }

    pub async fn shutdown(&self) {
        info!("shutting down: stopping scheduler and closing browser");
        self.scheduler.stop().await;
        self.close_session().await;
    }
}
