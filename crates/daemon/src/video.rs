//! Video references and content kinds shared by the cache, scheduler and poller.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Category of a video listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoKind {
    /// Currently streaming.
    Live,
    /// Ranked by view count.
    Popular,
}

impl VideoKind {
    /// Queue priority; lower is served first.
    pub fn priority(self) -> u8 {
        match self {
            VideoKind::Live => 0,
            VideoKind::Popular => 1,
        }
    }
}

impl std::fmt::Display for VideoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoKind::Live => write!(f, "live"),
            VideoKind::Popular => write!(f, "popular"),
        }
    }
}

/// A playable URL tagged with its priority class.
///
/// Two refs are equal when their URLs are equal, whatever their kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRef {
    pub url: String,
    pub kind: VideoKind,
}

impl VideoRef {
    pub fn new(url: impl Into<String>, kind: VideoKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }

    pub fn live(url: impl Into<String>) -> Self {
        Self::new(url, VideoKind::Live)
    }

    pub fn popular(url: impl Into<String>) -> Self {
        Self::new(url, VideoKind::Popular)
    }
}

impl PartialEq for VideoRef {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for VideoRef {}

impl Hash for VideoRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Tag every URL with the same kind.
pub fn refs_of(urls: &[String], kind: VideoKind) -> Vec<VideoRef> {
    urls.iter().map(|u| VideoRef::new(u.clone(), kind)).collect()
}
