//! Per-display assignment loop.
//!
//! Each worker owns one [`DisplayController`]. Every interval it asks the
//! display whether it is idle and, when it is, rotates to the next video the
//! scheduler hands out.

use super::DisplayController;
use crate::scheduler::Scheduler;
use crate::video::VideoRef;
use livewall_config::ScheduleConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type DisplayId = usize;

/// Current URL per display, shared with the status server.
pub type SharedDisplays = Arc<RwLock<BTreeMap<DisplayId, Option<String>>>>;

/// Extra time a play call gets on top of the element wait.
const PLAY_GRACE: Duration = Duration::from_secs(10);

/// What one pass of the loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Display still playing, or the idle check failed.
    Busy,
    /// Display idle but nothing could be claimed.
    Starved,
    /// A new video was started.
    Assigned(VideoRef),
    /// The claimed video could not be started and went back to the queue.
    PlayFailed,
}

pub struct DisplayWorker {
    id: DisplayId,
    controller: Box<dyn DisplayController>,
    scheduler: Arc<Scheduler>,
    displays: SharedDisplays,
    current_url: Option<String>,
    interval: Duration,
    probe_timeout: Duration,
    play_timeout: Duration,
}

impl DisplayWorker {
    pub fn new(
        id: DisplayId,
        controller: Box<dyn DisplayController>,
        scheduler: Arc<Scheduler>,
        schedule: &ScheduleConfig,
        displays: SharedDisplays,
    ) -> Self {
        Self {
            id,
            controller,
            scheduler,
            displays,
            current_url: None,
            interval: schedule.display_interval(),
            probe_timeout: schedule.probe_timeout(),
            play_timeout: schedule.probe_timeout() + PLAY_GRACE,
        }
    }

    pub fn id(&self) -> DisplayId {
        self.id
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    async fn idle(&self) -> bool {
        match timeout(self.probe_timeout, self.controller.is_idle()).await {
            Ok(Ok(idle)) => idle,
            Ok(Err(e)) => {
                warn!(display = self.id, error = %e, "idle check failed");
                false
            }
            Err(_) => {
                warn!(display = self.id, "idle check timed out");
                false
            }
        }
    }

    async fn publish(&self) {
        self.displays
            .write()
            .await
            .insert(self.id, self.current_url.clone());
    }

    /// Run one pass: idle check, then rotate and play when idle.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.idle().await {
            return TickOutcome::Busy;
        }

        let previous = self.current_url.clone();
        let Some(video) = self.scheduler.rotate(previous.as_deref()) else {
            debug!(display = self.id, "display idle, nothing to claim");
            return TickOutcome::Starved;
        };

        let failure = match timeout(self.play_timeout, self.controller.play(&video.url)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("play timed out".to_string()),
        };

        match failure {
            None => {
                info!(display = self.id, url = %video.url, kind = %video.kind, "display assigned");
                self.current_url = Some(video.url.clone());
                self.publish().await;
                TickOutcome::Assigned(video)
            }
            Some(reason) => {
                error!(display = self.id, url = %video.url, error = %reason, "failed to start video");
                if !self.scheduler.restore(&video, previous.as_deref()) {
                    // The old URL went to another display meanwhile.
                    self.current_url = None;
                    self.publish().await;
                }
                TickOutcome::PlayFailed
            }
        }
    }

    /// Loop until `cancel` fires, then release the display.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(display = self.id, "display loop started");
        self.publish().await;

        while !cancel.is_cancelled() {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        self.shutdown().await;
    }

    /// Release the current URL and close the controller.
    pub async fn shutdown(&mut self) {
        if let Some(url) = self.current_url.take() {
            self.scheduler.release(&url);
        }
        self.displays.write().await.remove(&self.id);

        if let Err(e) = self.controller.close().await {
            warn!(display = self.id, error = %e, "failed to close display");
        }
        info!(display = self.id, "display loop stopped");
    }
}

/// Scriptable controller for tests.
#[cfg(test)]
pub(crate) mod fake {
    use crate::display::{DisplayController, DisplayError, WebDriverError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    pub(crate) struct ControllerState {
        pub idle: AtomicBool,
        pub idle_error: AtomicBool,
        pub fail_play: AtomicBool,
        pub played: Mutex<Vec<String>>,
        pub closed: AtomicUsize,
    }

    impl ControllerState {
        pub fn played(&self) -> Vec<String> {
            self.played.lock().unwrap().clone()
        }

        pub fn set_idle(&self, idle: bool) {
            self.idle.store(idle, Ordering::SeqCst);
        }
    }

    pub(crate) struct FakeController {
        pub state: Arc<ControllerState>,
    }

    /// New controller that reports idle, plus a handle to its state.
    pub(crate) fn controller() -> (Box<dyn DisplayController>, Arc<ControllerState>) {
        let state = Arc::new(ControllerState {
            idle: AtomicBool::new(true),
            idle_error: AtomicBool::new(false),
            fail_play: AtomicBool::new(false),
            played: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        });
        (
            Box::new(FakeController {
                state: state.clone(),
            }),
            state,
        )
    }

    fn scripted_error() -> DisplayError {
        DisplayError::WebDriver(WebDriverError::Malformed("scripted failure".to_string()))
    }

    #[async_trait]
    impl DisplayController for FakeController {
        async fn play(&self, url: &str) -> Result<(), DisplayError> {
            if self.state.fail_play.load(Ordering::SeqCst) {
                return Err(scripted_error());
            }
            self.state.played.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn is_idle(&self) -> Result<bool, DisplayError> {
            if self.state.idle_error.load(Ordering::SeqCst) {
                return Err(scripted_error());
            }
            Ok(self.state.idle.load(Ordering::SeqCst))
        }

        async fn close(&self) -> Result<(), DisplayError> {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn schedule() -> ScheduleConfig {
        ScheduleConfig {
            display_interval_secs: 1,
            probe_timeout_secs: 1,
            ..ScheduleConfig::default()
        }
    }

    fn worker(
        id: DisplayId,
        scheduler: &Arc<Scheduler>,
        displays: &SharedDisplays,
    ) -> (DisplayWorker, Arc<fake::ControllerState>) {
        let (controller, state) = fake::controller();
        let worker = DisplayWorker::new(id, controller, scheduler.clone(), &schedule(), displays.clone());
        (worker, state)
    }

    fn setup() -> (Arc<Scheduler>, SharedDisplays) {
        (Arc::new(Scheduler::new()), SharedDisplays::default())
    }

    #[tokio::test]
    async fn test_idle_display_gets_next_video() {
        let (scheduler, displays) = setup();
        scheduler.enqueue(vec![VideoRef::live("L1"), VideoRef::popular("P1")]);
        let (mut w, state) = worker(0, &scheduler, &displays);

        assert_eq!(w.tick().await, TickOutcome::Assigned(VideoRef::live("L1")));
        assert_eq!(w.current_url(), Some("L1"));
        assert_eq!(state.played(), vec!["L1".to_string()]);
        assert!(scheduler.is_active("L1"));
        assert_eq!(displays.read().await.get(&0), Some(&Some("L1".to_string())));
    }

    #[tokio::test]
    async fn test_busy_display_keeps_its_video() {
        let (scheduler, displays) = setup();
        scheduler.enqueue(vec![VideoRef::popular("P1"), VideoRef::popular("P2")]);
        let (mut w, state) = worker(0, &scheduler, &displays);

        w.tick().await;
        state.set_idle(false);
        assert_eq!(w.tick().await, TickOutcome::Busy);
        assert_eq!(w.current_url(), Some("P1"));
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_idle_check_error_counts_as_busy() {
        let (scheduler, displays) = setup();
        scheduler.enqueue(vec![VideoRef::popular("P1")]);
        let (mut w, state) = worker(0, &scheduler, &displays);
        state.idle_error.store(true, Ordering::SeqCst);

        assert_eq!(w.tick().await, TickOutcome::Busy);
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_releases_previous() {
        let (scheduler, displays) = setup();
        scheduler.enqueue(vec![VideoRef::popular("P1"), VideoRef::popular("P2")]);
        let (mut w, _state) = worker(0, &scheduler, &displays);

        w.tick().await;
        assert_eq!(w.tick().await, TickOutcome::Assigned(VideoRef::popular("P2")));
        assert!(!scheduler.is_active("P1"));
        assert!(scheduler.is_active("P2"));
    }

    #[tokio::test]
    async fn test_starved_display_keeps_current() {
        let (scheduler, displays) = setup();
        scheduler.enqueue(vec![VideoRef::live("L1")]);
        let (mut w, _state) = worker(0, &scheduler, &displays);

        w.tick().await;
        assert_eq!(w.tick().await, TickOutcome::Starved);
        assert_eq!(w.current_url(), Some("L1"));
        assert!(scheduler.is_active("L1"));
    }

    #[tokio::test]
    async fn test_play_failure_requeues_claim() {
        let (scheduler, displays) = setup();
        scheduler.enqueue(vec![VideoRef::popular("P1"), VideoRef::popular("P2")]);
        let (mut w, state) = worker(0, &scheduler, &displays);

        w.tick().await;
        state.fail_play.store(true, Ordering::SeqCst);

        assert_eq!(w.tick().await, TickOutcome::PlayFailed);
        assert_eq!(w.current_url(), Some("P1"));
        assert!(scheduler.is_active("P1"));
        assert!(!scheduler.is_active("P2"));
        assert_eq!(scheduler.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel_and_cleans_up() {
        let (scheduler, displays) = setup();
        scheduler.enqueue(vec![VideoRef::popular("P1")]);
        let (w, state) = worker(3, &scheduler, &displays);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(w.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(state.played(), vec!["P1".to_string()]);
        assert_eq!(state.closed.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_active("P1"));
        assert!(displays.read().await.is_empty());
    }
}
