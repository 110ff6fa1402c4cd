//! livewall
//!
//! Rotates videos across displays: live streams preempt a pool of popular
//! videos, listings are cached with per-kind TTLs, and one worker per display
//! pulls the next video from a shared priority scheduler.

pub mod cache;
pub mod catalog;
pub mod daemon;
pub mod display;
pub mod poller;
pub mod probe;
pub mod scheduler;
pub mod source;
pub mod status_server;
pub mod video;

pub use livewall_config as config;
pub use livewall_config::Config;
pub use cache::{CacheEntry, CacheStore, CacheTtls, PageToken};
pub use catalog::{Catalog, Listing};
pub use daemon::{Daemon, DaemonError, SeedReport};
pub use display::{
    create_controller, Backend, BrowserDisplay, DisplayController, DisplayError, DisplayWorker,
};
pub use poller::{should_refresh_live, LivePoller, PollOutcome};
pub use probe::{create_counter, ApiLiveCounter, LiveCounter, PageLiveCounter, ProbeError};
pub use scheduler::{Scheduler, SchedulerSnapshot};
pub use source::{SourceError, VideoPage, VideoSource, YouTubeSource};
pub use status_server::{create_status_router, run_status_server, ServerError, StatusSnapshot};
pub use video::{VideoKind, VideoRef};
