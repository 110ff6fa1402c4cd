//! Daemon startup and main loop for livewall
//!
//! Seeds the scheduler from the cache (or the listing API), opens one display
//! per configured screen, then runs the display workers, the live poller and
//! the status server until the cancellation token fires.

use crate::cache::{CacheStore, CacheTtls};
use crate::catalog::Catalog;
use crate::config::{Config, ConfigError};
use crate::display::{create_controller, DisplayController, DisplayId, DisplayWorker, SharedDisplays};
use crate::poller::LivePoller;
use crate::probe::{create_counter, LiveCounter, ProbeError};
use crate::scheduler::Scheduler;
use crate::source::{SourceError, VideoSource, YouTubeSource};
use crate::status_server::{run_status_server, StatusState};
use crate::video::{refs_of, VideoKind};
use rand::seq::SliceRandom;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listing client could not be built
    #[error("Video source error: {0}")]
    Source(#[from] SourceError),

    /// Live-count probe could not be built
    #[error("Live probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Every display failed to open
    #[error("no display could be opened")]
    NoDisplays,
}

/// How many videos startup seeding queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub live: usize,
    pub popular: usize,
}

/// Daemon state containing all runtime components
pub struct Daemon {
    config: Config,
    catalog: Catalog,
    scheduler: Arc<Scheduler>,
    counter: Arc<dyn LiveCounter>,
    displays: SharedDisplays,
}

impl Daemon {
    /// Build the daemon with the YouTube listing client and the configured probe
    ///
    /// # Arguments
    /// * `config` - Loaded configuration; validated again here
    ///
    /// # Returns
    /// * `Ok(Daemon)` - Daemon initialized successfully
    /// * `Err(DaemonError)` - Missing API key or an adapter could not be built
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        config.validate()?;
        let source = YouTubeSource::new(config.api.clone())?;
        let counter = create_counter(&config)?;
        Ok(Self::with_components(config, Arc::new(source), counter))
    }

    /// Build the daemon around an existing video source and live counter
    pub fn with_components(
        config: Config,
        source: Arc<dyn VideoSource>,
        counter: Arc<dyn LiveCounter>,
    ) -> Self {
        let cache = Arc::new(CacheStore::open(
            &config.cache.path,
            CacheTtls::from(&config.cache),
        ));

        Self {
            catalog: Catalog::new(cache, source),
            scheduler: Arc::new(Scheduler::new()),
            counter,
            displays: SharedDisplays::default(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    pub fn status_state(&self) -> StatusState {
        StatusState {
            scheduler: self.scheduler.clone(),
            displays: self.displays.clone(),
        }
    }

    /// Queue the initial live and popular listings
    ///
    /// Listings come from the cache while it is valid. A failed listing is
    /// logged and skipped; the poller fills the gap later.
    pub async fn seed(&self) -> SeedReport {
        let mut report = SeedReport::default();

        match self
            .catalog
            .load(VideoKind::Live, self.config.limits.live_results, None, false)
            .await
        {
            Ok(listing) => report.live = self.scheduler.replace_live(&listing.urls),
            Err(e) => warn!(error = %e, "failed to load live videos"),
        }

        match self
            .catalog
            .load(VideoKind::Popular, self.config.limits.popular_results, None, false)
            .await
        {
            Ok(listing) => {
                let mut urls = listing.urls;
                if self.config.schedule.shuffle_popular {
                    urls.shuffle(&mut rand::rng());
                }
                report.popular = self.scheduler.enqueue(refs_of(&urls, VideoKind::Popular));
            }
            Err(e) => warn!(error = %e, "failed to load popular videos"),
        }

        info!(live = report.live, popular = report.popular, "scheduler seeded");
        report
    }

    /// Open one controller per configured screen, concurrently
    ///
    /// Screens whose controller cannot be created are logged and skipped.
    pub async fn open_displays(&self) -> Vec<(DisplayId, Box<dyn DisplayController>)> {
        let mut set = JoinSet::new();
        for (id, screen) in self.config.display.screens.iter().cloned().enumerate() {
            let display = self.config.display.clone();
            let wait = self.config.schedule.probe_timeout();
            set.spawn(async move { (id, create_controller(&display, &screen, wait).await) });
        }

        let mut opened = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, Ok(controller))) => opened.push((id, controller)),
                Ok((id, Err(e))) => error!(display = id, error = %e, "failed to open display"),
                Err(e) => error!(error = %e, "display open task failed"),
            }
        }
        opened.sort_by_key(|(id, _)| *id);
        opened
    }

    /// Seed, open the displays and run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        self.seed().await;
        let controllers = self.open_displays().await;
        self.run_with_controllers(controllers, cancel).await
    }

    /// Run the workers over already opened displays until `cancel` fires
    ///
    /// # Returns
    /// * `Ok(())` once every worker has stopped and closed its display
    /// * `Err(DaemonError::NoDisplays)` if `controllers` is empty
    pub async fn run_with_controllers(
        self,
        controllers: Vec<(DisplayId, Box<dyn DisplayController>)>,
        cancel: CancellationToken,
    ) -> Result<(), DaemonError> {
        if controllers.is_empty() {
            return Err(DaemonError::NoDisplays);
        }

        let mut tasks = JoinSet::new();

        if self.config.status.enabled {
            let state = self.status_state();
            let bind = self.config.status.bind.clone();
            let token = cancel.clone();
            tasks.spawn(async move {
                if let Err(e) = run_status_server(state, &bind, token).await {
                    error!(error = %e, "status server error");
                }
            });
        }

        let poller = LivePoller::new(
            self.catalog.clone(),
            self.scheduler.clone(),
            self.counter.clone(),
            &self.config,
        );
        tasks.spawn(poller.run(cancel.clone()));

        let count = controllers.len();
        for (id, controller) in controllers {
            let worker = DisplayWorker::new(
                id,
                controller,
                self.scheduler.clone(),
                &self.config.schedule,
                self.displays.clone(),
            );
            tasks.spawn(worker.run(cancel.clone()));
        }
        info!(displays = count, "daemon running");

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "daemon task failed");
            }
        }

        info!("daemon stopped");
        Ok(())
    }
}
