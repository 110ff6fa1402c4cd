//! Cache store for video listings.
//!
//! Holds one record per content kind and persists the whole cache as a single
//! JSON file after every update. Reads fail open: a missing, unreadable or
//! corrupt file yields an empty cache. Write failures are logged and the
//! in-memory update is kept; the next successful write catches up.

use crate::video::VideoKind;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Pagination cursor returned by the video source.
///
/// Persisted as a JSON string, or as `-1` once the listing is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// Resume from this cursor.
    Next(String),
    /// No further pages.
    Exhausted,
}

impl PageToken {
    /// The cursor to resume from, if any.
    pub fn next(&self) -> Option<&str> {
        match self {
            PageToken::Next(token) => Some(token),
            PageToken::Exhausted => None,
        }
    }
}

impl Serialize for PageToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PageToken::Next(token) => serializer.serialize_str(token),
            PageToken::Exhausted => serializer.serialize_i64(-1),
        }
    }
}

impl<'de> Deserialize<'de> for PageToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(token) if !token.is_empty() => Ok(PageToken::Next(token)),
            Raw::Text(_) | Raw::Number(-1) => Ok(PageToken::Exhausted),
            Raw::Number(n) => Err(serde::de::Error::custom(format!(
                "page token must be a string or -1, got {}",
                n
            ))),
        }
    }
}

/// `last_updated` is written as a calendar date; RFC 3339 is also accepted on read.
mod day_stamp {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format("%Y-%m-%d").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(text) => parse_stamp(&text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", text))),
        }
    }

    pub fn parse_stamp(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// One cached listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, with = "day_stamp")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub last_page_token: Option<PageToken>,
}

/// On-disk layout, keyed by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    live: Option<CacheEntry>,
    #[serde(rename = "viewCount", default, skip_serializing_if = "Option::is_none")]
    popular: Option<CacheEntry>,
}

impl CacheFile {
    fn slot(&self, kind: VideoKind) -> &Option<CacheEntry> {
        match kind {
            VideoKind::Live => &self.live,
            VideoKind::Popular => &self.popular,
        }
    }

    fn slot_mut(&mut self, kind: VideoKind) -> &mut Option<CacheEntry> {
        match kind {
            VideoKind::Live => &mut self.live,
            VideoKind::Popular => &mut self.popular,
        }
    }
}

/// Validity window per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub live: Duration,
    pub popular: Duration,
}

impl CacheTtls {
    pub fn for_kind(&self, kind: VideoKind) -> Duration {
        match kind {
            VideoKind::Live => self.live,
            VideoKind::Popular => self.popular,
        }
    }
}

impl From<&livewall_config::CacheConfig> for CacheTtls {
    fn from(cfg: &livewall_config::CacheConfig) -> Self {
        Self {
            live: cfg.live_ttl(),
            popular: cfg.popular_ttl(),
        }
    }
}

#[derive(Debug, Error)]
enum PersistError {
    #[error("serialize cache: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write cache file: {0}")]
    Io(#[from] std::io::Error),
}

/// Check whether an entry stamped at `last_updated` is still fresh at `now`.
///
/// Fresh means strictly less than `ttl` has elapsed; at exactly `ttl` the entry
/// has expired. A stamp in the future counts as fresh.
///
/// This is a pure function extracted for property testing.
pub fn entry_is_fresh(last_updated: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    let ttl = match chrono::Duration::from_std(ttl) {
        Ok(ttl) => ttl,
        Err(_) => return true,
    };
    now.signed_duration_since(last_updated) < ttl
}

/// Set union that keeps `existing` order and appends unseen `incoming` URLs.
pub fn merge_urls(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    for url in existing.iter().chain(incoming.iter()) {
        if seen.insert(url.as_str()) {
            merged.push(url.clone());
        }
    }
    merged
}

/// Durable, lock-guarded owner of all cached listings.
pub struct CacheStore {
    path: PathBuf,
    ttls: CacheTtls,
    state: Mutex<CacheFile>,
    /// Serializes writers so an older snapshot never lands after a newer one.
    write_gate: Mutex<()>,
}

impl CacheStore {
    /// Open the cache at `path`, starting empty if it cannot be read.
    pub fn open<P: AsRef<Path>>(path: P, ttls: CacheTtls) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = load_file(&path);
        Self {
            path,
            ttls,
            state: Mutex::new(state),
            write_gate: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self, kind: VideoKind) -> Duration {
        self.ttls.for_kind(kind)
    }

    /// Current entry for `kind`.
    pub fn get(&self, kind: VideoKind) -> Option<CacheEntry> {
        self.lock_state().slot(kind).clone()
    }

    /// Whether `kind` has a fresh entry under its configured TTL.
    pub fn is_valid(&self, kind: VideoKind) -> bool {
        self.is_valid_with(kind, self.ttl(kind))
    }

    /// Whether `kind` has a fresh entry under an explicit TTL.
    pub fn is_valid_with(&self, kind: VideoKind, ttl: Duration) -> bool {
        self.is_valid_at(kind, ttl, Utc::now())
    }

    pub fn is_valid_at(&self, kind: VideoKind, ttl: Duration, now: DateTime<Utc>) -> bool {
        match self.lock_state().slot(kind) {
            Some(CacheEntry {
                last_updated: Some(stamp),
                ..
            }) => entry_is_fresh(*stamp, now, ttl),
            _ => false,
        }
    }

    /// Record a fresh listing for `kind` and persist the cache.
    ///
    /// Popular listings are merged into the existing URLs; live listings
    /// replace them. Returns the stored entry.
    ///
    /// Blocks on file IO; async callers run it on the blocking pool. Writers
    /// are serialized so the file always holds the latest snapshot, and
    /// readers only wait on the in-memory state, never on the write.
    pub fn update(
        &self,
        urls: &[String],
        page_token: Option<PageToken>,
        kind: VideoKind,
    ) -> CacheEntry {
        let _writer = self
            .write_gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let (entry, snapshot) = {
            let mut state = self.lock_state();
            let slot = state.slot_mut(kind);
            let urls = match (kind, slot.as_ref()) {
                (VideoKind::Popular, Some(existing)) => merge_urls(&existing.urls, urls),
                _ => merge_urls(&[], urls),
            };
            let entry = CacheEntry {
                last_updated: Some(Utc::now()),
                urls,
                last_page_token: page_token,
            };
            *slot = Some(entry.clone());
            (entry, state.clone())
        };

        match persist(&self.path, &snapshot) {
            Ok(()) => debug!(kind = %kind, path = %self.path.display(), "cache persisted"),
            Err(e) => error!(
                kind = %kind,
                path = %self.path.display(),
                "failed to persist cache, keeping in-memory update: {}",
                e
            ),
        }

        entry
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheFile> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn load_file(path: &Path) -> CacheFile {
    if !path.exists() {
        return CacheFile::default();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), "failed to read cache, starting empty: {}", e);
            return CacheFile::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), "corrupt cache file, starting empty: {}", e);
            CacheFile::default()
        }
    }
}

/// Write to `<path>.tmp` then rename over the target.
fn persist(path: &Path, file: &CacheFile) -> Result<(), PersistError> {
    let json = serde_json::to_string_pretty(file)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
