//! Live-stream poller.
//!
//! Every interval the poller probes how many streams are live. A rise means a
//! new stream started: the live listing is fetched past the cache and the
//! scheduler's live roster is replaced. Otherwise, when the queue has run dry,
//! the next page of popular videos is pulled in.

use crate::cache::PageToken;
use crate::catalog::Catalog;
use crate::probe::LiveCounter;
use crate::scheduler::Scheduler;
use crate::video::{refs_of, VideoKind};
use livewall_config::Config;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Live count rose and the live roster was replaced.
    LiveRefreshed {
        previous: usize,
        current: usize,
        queued: usize,
    },
    /// The queue was empty and another popular page was queued.
    PopularPage { queued: usize },
    Idle,
    /// Probe or fetch failed; retried next tick.
    Failed,
}

/// A live refresh is due only when the count went up.
pub fn should_refresh_live(previous: usize, current: usize) -> bool {
    current > previous
}

pub struct LivePoller {
    catalog: Catalog,
    scheduler: Arc<Scheduler>,
    counter: Arc<dyn LiveCounter>,
    previous_live_count: usize,
    live_results: u32,
    popular_results: u32,
    shuffle_popular: bool,
    interval: Duration,
    probe_timeout: Duration,
}

impl LivePoller {
    /// Create a poller whose baseline is the size of the cached live listing.
    pub fn new(
        catalog: Catalog,
        scheduler: Arc<Scheduler>,
        counter: Arc<dyn LiveCounter>,
        config: &Config,
    ) -> Self {
        let previous_live_count = catalog
            .cache()
            .get(VideoKind::Live)
            .map(|entry| entry.urls.len())
            .unwrap_or(0);

        Self {
            catalog,
            scheduler,
            counter,
            previous_live_count,
            live_results: config.limits.live_results,
            popular_results: config.limits.popular_results,
            shuffle_popular: config.schedule.shuffle_popular,
            interval: config.schedule.poll_interval(),
            probe_timeout: config.live_probe.timeout(),
        }
    }

    pub fn previous_live_count(&self) -> usize {
        self.previous_live_count
    }

    pub async fn tick(&mut self) -> PollOutcome {
        let current = match timeout(self.probe_timeout, self.counter.count_live_streams()).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!(error = %e, "live count probe failed");
                return PollOutcome::Failed;
            }
            Err(_) => {
                warn!("live count probe timed out");
                return PollOutcome::Failed;
            }
        };

        let previous = self.previous_live_count;
        if should_refresh_live(previous, current) {
            info!(previous, current, "new live stream detected, refreshing live videos");
            return match self
                .catalog
                .load(VideoKind::Live, self.live_results, None, true)
                .await
            {
                Ok(listing) => {
                    let queued = self.scheduler.replace_live(&listing.urls);
                    self.previous_live_count = current;
                    PollOutcome::LiveRefreshed {
                        previous,
                        current,
                        queued,
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to refresh live videos");
                    PollOutcome::Failed
                }
            };
        }

        if current != previous {
            debug!(previous, current, "live count dropped");
        }
        self.previous_live_count = current;
        self.refill_popular().await
    }

    async fn refill_popular(&self) -> PollOutcome {
        if !self.scheduler.is_queue_empty() {
            return PollOutcome::Idle;
        }

        let token = match self
            .catalog
            .cache()
            .get(VideoKind::Popular)
            .and_then(|entry| entry.last_page_token)
        {
            Some(PageToken::Next(token)) => token,
            _ => return PollOutcome::Idle,
        };

        info!("queue empty, fetching next popular page");
        match self
            .catalog
            .load(VideoKind::Popular, self.popular_results, Some(&token), true)
            .await
        {
            Ok(listing) => {
                let mut urls = listing.urls;
                if self.shuffle_popular {
                    urls.shuffle(&mut rand::rng());
                }
                let queued = self.scheduler.enqueue(refs_of(&urls, VideoKind::Popular));
                PollOutcome::PopularPage { queued }
            }
            Err(e) => {
                error!(error = %e, "failed to fetch popular page");
                PollOutcome::Failed
            }
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            baseline = self.previous_live_count,
            interval_secs = self.interval.as_secs(),
            "live poller started"
        );

        while !cancel.is_cancelled() {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        info!("live poller stopped");
    }
}
