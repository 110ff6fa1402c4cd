//! Fetch-through cache over a [`VideoSource`].
//!
//! The catalog is the only caller of the video source. While the cache entry
//! for a kind is valid it answers from the cache; a bypass forces a fetch.

use crate::cache::{CacheStore, PageToken};
use crate::source::{SourceError, VideoSource};
use crate::video::VideoKind;
use std::sync::Arc;
use tracing::{error, info};

/// Result of a catalog lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub urls: Vec<String>,
    /// Cursor after this listing; `None` when served from a cache entry without one.
    pub next_page_token: Option<PageToken>,
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct Catalog {
    cache: Arc<CacheStore>,
    source: Arc<dyn VideoSource>,
}

impl Catalog {
    pub fn new(cache: Arc<CacheStore>, source: Arc<dyn VideoSource>) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// List videos of `kind`, from the cache when it is valid and `bypass` is off.
    ///
    /// A fetched page is written to the cache (merged for popular, replacing
    /// for live) before it is returned. The returned URLs are the fetched page
    /// only, not the merged cache contents.
    pub async fn load(
        &self,
        kind: VideoKind,
        max_results: u32,
        page_token: Option<&str>,
        bypass: bool,
    ) -> Result<Listing, SourceError> {
        if !bypass && self.cache.is_valid(kind) {
            if let Some(entry) = self.cache.get(kind) {
                info!(
                    kind = %kind,
                    last_updated = ?entry.last_updated,
                    "using cached {} videos",
                    kind
                );
                return Ok(Listing {
                    urls: entry.urls,
                    next_page_token: entry.last_page_token,
                    from_cache: true,
                });
            }
        }

        let page = self.source.fetch(kind, max_results, page_token).await?;

        let cache = Arc::clone(&self.cache);
        let urls = page.urls.clone();
        let token = page.next_page_token.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || cache.update(&urls, Some(token), kind)).await
        {
            error!(kind = %kind, error = %e, "cache update task failed");
        }

        Ok(Listing {
            urls: page.urls,
            next_page_token: Some(page.next_page_token),
            from_cache: false,
        })
    }
}
