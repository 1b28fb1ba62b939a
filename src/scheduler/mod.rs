//! Background posting loop.
//!
//! One worker task wakes every tick, and when the jittered interval since
//! the last successful post has elapsed it takes the oldest queued request,
//! gates it on authentication and hands it to the pipeline. Only successes
//! move `last_post_at`, so a failed request never delays the next one.

pub mod jitter;

use crate::automation::pipeline::PostPipeline;
use crate::core::config::ConfigStore;
use crate::core::error::{AutomationError, FailureReason};
use crate::core::types::{ErrorEntry, HistoryEntry, PostRequest, ScheduleStatus};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub error_backoff: Duration,
    pub stop_timeout: Duration,
    /// Finished requests kept for inspection.
    pub recent_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(10),
            error_backoff: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(3),
            recent_capacity: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Interval since the last success has not elapsed.
    NotDue,
    /// Due, but nothing queued.
    Idle,
    Processed(PostRequest),
}

struct Inner {
    queue: VecDeque<PostRequest>,
    recent: VecDeque<PostRequest>,
    in_flight: Option<PostRequest>,
    last_post_at: Option<DateTime<Utc>>,
    interval: Duration,
}

impl Inner {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_post_at {
            None => true,
            Some(last) => (now - last).to_std().map_or(false, |e| e > self.interval),
        }
    }

    fn next_post_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_post_at?;
        let gap = chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::zero());
        Some(last + gap)
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

pub struct PostScheduler {
    pipeline: Arc<dyn PostPipeline>,
    store: Arc<ConfigStore>,
    settings: SchedulerSettings,
    inner: Mutex<Inner>,
    worker: Mutex<Option<Worker>>,
    running: AtomicBool,
    /// Bumped by every `start`; a loop only clears `running` for its own run.
    generation: AtomicU64,
    status_tx: watch::Sender<ScheduleStatus>,
}

impl PostScheduler {
    pub fn new(
        pipeline: Arc<dyn PostPipeline>,
        store: Arc<ConfigStore>,
        settings: SchedulerSettings,
    ) -> Arc<Self> {
        let base = store.interval_minutes();
        let inner = Inner {
            queue: VecDeque::new(),
            recent: VecDeque::new(),
            in_flight: None,
            last_post_at: None,
            interval: jitter::draw_interval(base),
        };
        let (status_tx, _) = watch::channel(ScheduleStatus {
            running: false,
            in_flight: false,
            queue_size: 0,
            interval_minutes: base,
            last_post_at: None,
            next_post_at: None,
        });
        Arc::new(Self {
            pipeline,
            store,
            settings,
            inner: Mutex::new(inner),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            status_tx,
        })
    }

    // ── Queue ────────────────────────────────────────────────────────────────

    /// Queues a post and starts the worker if it is stopped. Returns `false`
    /// (and queues nothing) for blank text.
    pub fn enqueue(self: &Arc<Self>, text: &str, media_paths: Vec<PathBuf>) -> bool {
        self.enqueue_request(text, media_paths).is_some()
    }

    /// Same as [`enqueue`](Self::enqueue) but returns the queued request.
    pub fn enqueue_request(
        self: &Arc<Self>,
        text: &str,
        media_paths: Vec<PathBuf>,
    ) -> Option<PostRequest> {
        let request = PostRequest::new(text, media_paths)?;
        let size = {
            let mut inner = self.lock_inner();
            inner.queue.push_back(request.clone());
            inner.queue.len()
        };
        info!("scheduler: queued post {} (queue size {})", request.id, size);
        if !self.is_running() {
            self.start();
        } else {
            self.publish_status();
        }
        Some(request)
    }

    pub fn clear_queue(&self) -> usize {
        let n = {
            let mut inner = self.lock_inner();
            let n = inner.queue.len();
            inner.queue.clear();
            n
        };
        info!("scheduler: cleared {} queued post(s)", n);
        self.publish_status();
        n
    }

    pub fn queue_size(&self) -> usize {
        self.lock_inner().queue.len()
    }

    pub fn queued(&self) -> Vec<PostRequest> {
        self.lock_inner().queue.iter().cloned().collect()
    }

    /// Finished requests, oldest first.
    pub fn recent(&self) -> Vec<PostRequest> {
        self.lock_inner().recent.iter().cloned().collect()
    }

    pub fn last_post_at(&self) -> Option<DateTime<Utc>> {
        self.lock_inner().last_post_at
    }

    pub fn set_interval_minutes(&self, minutes: u32) -> Result<(), AutomationError> {
        self.store.set_interval_minutes(minutes)?;
        self.lock_inner().interval = jitter::draw_interval(minutes);
        info!("scheduler: posting interval set to {} minutes", minutes);
        self.publish_status();
        Ok(())
    }

    // ── Status ───────────────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ScheduleStatus {
        let interval_minutes = self.store.interval_minutes();
        let inner = self.lock_inner();
        ScheduleStatus {
            running: self.is_running(),
            in_flight: inner.in_flight.is_some(),
            queue_size: inner.queue.len(),
            interval_minutes,
            last_post_at: inner.last_post_at,
            next_post_at: inner.next_post_at(),
        }
    }

    /// Receives a fresh [`ScheduleStatus`] after every state change.
    pub fn subscribe(&self) -> watch::Receiver<ScheduleStatus> {
        self.status_tx.subscribe()
    }

    fn publish_status(&self) {
        let status = self.status();
        self.status_tx.send_replace(status);
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Spawns the worker. Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut worker = lock(&self.worker);
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).run_loop(cancel_rx, generation));
        *worker = Some(Worker { handle, cancel_tx });
        drop(worker);
        info!("scheduler: started");
        self.publish_status();
        true
    }

    /// Signals the worker and waits a bounded time for it to exit.
    pub async fn stop(&self) {
        let worker = lock(&self.worker).take();
        self.running.store(false, Ordering::SeqCst);
        let Some(Worker { handle, cancel_tx }) = worker else {
            self.publish_status();
            return;
        };
        let _ = cancel_tx.send(true);
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.settings.stop_timeout, handle).await {
            Ok(_) => info!("scheduler: stopped"),
            Err(_) => {
                warn!(
                    "scheduler: worker did not exit within {}ms, aborting",
                    self.settings.stop_timeout.as_millis()
                );
                abort.abort();
                self.abandon_in_flight("scheduler stopped while posting");
            }
        }
        self.publish_status();
    }

    /// Fails whatever was mid-post when the worker died and records it in the
    /// error log.
    fn abandon_in_flight(&self, message: &str) {
        let abandoned = {
            let mut inner = self.lock_inner();
            inner.in_flight.take().map(|mut req| {
                req.fail(FailureReason::Cancelled, message);
                push_bounded(&mut inner.recent, req.clone(), self.settings.recent_capacity);
                req
            })
        };
        if let Some(req) = abandoned {
            warn!("scheduler: post {} abandoned: {}", req.id, message);
            let entry = ErrorEntry::for_post(&req, FailureReason::Cancelled, message);
            if let Err(e) = self.store.append_error(entry) {
                warn!("scheduler: failed to persist abandoned post {}: {}", req.id, e);
            }
        }
    }

    async fn run_loop(self: Arc<Self>, mut cancel: watch::Receiver<bool>, generation: u64) {
        info!(
            "scheduler: loop running (tick {}s, interval ~{}m)",
            self.settings.tick.as_secs(),
            self.store.interval_minutes()
        );
        loop {
            if *cancel.borrow() {
                break;
            }
            let delay = match AssertUnwindSafe(self.tick(&cancel)).catch_unwind().await {
                Ok(Ok(_)) => self.settings.tick,
                Ok(Err(e)) => {
                    error!("scheduler: tick failed: {}", e);
                    self.record_loop_error(&e.to_string());
                    self.settings.error_backoff
                }
                Err(_) => {
                    error!("scheduler: tick panicked");
                    self.abandon_in_flight("scheduler tick panicked while posting");
                    self.record_loop_error("scheduler tick panicked");
                    self.settings.error_backoff
                }
            };
            self.publish_status();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }
        {
            let _worker = lock(&self.worker);
            if self.generation.load(Ordering::SeqCst) == generation {
                self.running.store(false, Ordering::SeqCst);
            }
        }
        self.publish_status();
        info!("scheduler: loop exited");
    }

    /// One scheduling step. The worker calls this every tick; it is public
    /// so callers can drive the scheduler deterministically.
    pub async fn tick(&self, cancel: &watch::Receiver<bool>) -> Result<TickOutcome, AutomationError> {
        let now = Utc::now();
        let request = {
            let mut inner = self.lock_inner();
            if !inner.is_due(now) {
                return Ok(TickOutcome::NotDue);
            }
            let Some(mut request) = inner.queue.pop_front() else {
                return Ok(TickOutcome::Idle);
            };
            request.mark_processing();
            inner.in_flight = Some(request.clone());
            request
        };
        self.publish_status();
        info!("scheduler: processing post {}", request.id);

        let (finished, persisted) = self.process(request, now, cancel).await;
        {
            let mut inner = self.lock_inner();
            inner.in_flight = None;
            push_bounded(&mut inner.recent, finished.clone(), self.settings.recent_capacity);
        }
        self.publish_status();
        persisted?;
        Ok(TickOutcome::Processed(finished))
    }

    async fn process(
        &self,
        request: PostRequest,
        now: DateTime<Utc>,
        cancel: &watch::Receiver<bool>,
    ) -> (PostRequest, Result<(), AutomationError>) {
        match self.pipeline.check_authentication().await {
            Ok(v) if v.is_logged_in() => {}
            Ok(v) => {
                let msg = match v.challenge_message {
                    Some(m) => format!("not logged in ({m})"),
                    None => "not logged in".to_string(),
                };
                return self.record_failure(request, FailureReason::NotAuthenticated, msg);
            }
            Err(e) => {
                let msg = format!("authentication check failed: {e}");
                return self.record_failure(request, e.failure_reason(), msg);
            }
        }

        let media = if self.store.read(|s| s.skip_media) {
            Vec::new()
        } else {
            request.media_paths.clone()
        };

        match self.pipeline.publish(&request.text, &media, cancel).await {
            Ok(outcome) => {
                for w in &outcome.warnings {
                    warn!("scheduler: post {}: {}", request.id, w);
                }
                self.record_success(request, now)
            }
            Err(failure) => self.record_failure(request, failure.reason, failure.message),
        }
    }

    fn record_success(
        &self,
        mut request: PostRequest,
        now: DateTime<Utc>,
    ) -> (PostRequest, Result<(), AutomationError>) {
        request.complete();
        let base = self.store.interval_minutes();
        let next = {
            let mut inner = self.lock_inner();
            inner.last_post_at = Some(now);
            inner.interval = jitter::draw_interval(base);
            inner.interval
        };
        info!(
            "scheduler: published post {}; next post in {:.1} minutes",
            request.id,
            next.as_secs_f64() / 60.0
        );
        let persisted = self.store.append_history(HistoryEntry::published(&request));
        (request, persisted)
    }

    fn record_failure(
        &self,
        mut request: PostRequest,
        reason: FailureReason,
        message: String,
    ) -> (PostRequest, Result<(), AutomationError>) {
        warn!("scheduler: post {} failed ({}): {}", request.id, reason, message);
        request.fail(reason, message.clone());
        let persisted = self
            .store
            .append_error(ErrorEntry::for_post(&request, reason, &message));
        (request, persisted)
    }

    fn record_loop_error(&self, message: &str) {
        if let Err(e) = self.store.append_error(ErrorEntry::new(message)) {
            warn!("scheduler: failed to persist loop error: {}", e);
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn push_bounded(buf: &mut VecDeque<PostRequest>, item: PostRequest, cap: usize) {
    buf.push_back(item);
    while buf.len() > cap {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner_with_last(last: Option<DateTime<Utc>>, interval: Duration) -> Inner {
        Inner {
            queue: VecDeque::new(),
            recent: VecDeque::new(),
            in_flight: None,
            last_post_at: last,
            interval,
        }
    }

    #[test]
    fn due_only_once_the_interval_has_strictly_elapsed() {
        let interval = Duration::from_secs(600);
        let last = Utc::now();
        let inner = inner_with_last(Some(last), interval);

        let exactly = last + chrono::Duration::seconds(600);
        assert!(!inner.is_due(exactly));
        assert!(!inner.is_due(last + chrono::Duration::seconds(599)));
        assert!(inner.is_due(exactly + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn never_posted_is_always_due() {
        let inner = inner_with_last(None, Duration::from_secs(600));
        assert!(inner.is_due(Utc::now()));
        assert_eq!(inner.next_post_at(), None);
    }

    #[test]
    fn clock_going_backwards_is_not_due() {
        let last = Utc::now();
        let inner = inner_with_last(Some(last), Duration::from_secs(60));
        assert!(!inner.is_due(last - chrono::Duration::seconds(5)));
    }
}
