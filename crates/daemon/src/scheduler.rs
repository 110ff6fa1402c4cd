//! Priority scheduler shared by the display workers and the poller.
//!
//! Holds a stable priority queue of candidate videos, the roster of known live
//! URLs and the set of URLs currently assigned to a display. All state sits
//! behind one mutex; every operation is a short critical section with no I/O
//! and no `.await` inside it.
//!
//! Invariants:
//! - the queue never holds a URL that is active;
//! - a URL is active at most once, so no two displays hold the same URL;
//! - live URLs preempt the queue: while a roster URL is free, `claim_next`
//!   returns it before anything queued.

use crate::video::{VideoKind, VideoRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

type QueueKey = (u8, u64);

#[derive(Debug, Default)]
struct SchedulerState {
    /// Ordered by priority, then by insertion sequence.
    queue: BTreeMap<QueueKey, VideoRef>,
    /// URL -> queue key, for duplicate checks and removal.
    queued: HashMap<String, QueueKey>,
    /// Known live URLs in enqueue order.
    live_roster: Vec<String>,
    active: HashSet<String>,
    next_seq: u64,
}

impl SchedulerState {
    fn enqueue(&mut self, video: VideoRef) -> bool {
        if video.kind == VideoKind::Live && !self.live_roster.contains(&video.url) {
            self.live_roster.push(video.url.clone());
        }

        if self.active.contains(&video.url) || self.queued.contains_key(&video.url) {
            return false;
        }

        let key = (video.kind.priority(), self.next_seq);
        self.next_seq += 1;
        self.queued.insert(video.url.clone(), key);
        self.queue.insert(key, video);
        true
    }

    fn remove_queued(&mut self, url: &str) -> Option<VideoRef> {
        let key = self.queued.remove(url)?;
        self.queue.remove(&key)
    }

    // `excluding` is skipped in the live roster as well as at the queue head.
    fn claim_next(&mut self, excluding: Option<&str>) -> Option<VideoRef> {
        let free_live = self
            .live_roster
            .iter()
            .find(|url| !self.active.contains(*url) && Some(url.as_str()) != excluding)
            .cloned();

        let claimed = match free_live {
            Some(url) => {
                self.remove_queued(&url);
                VideoRef::live(url)
            }
            None => {
                // Head of the queue, or the entry behind it when the head is
                // the excluded URL. The excluded entry keeps its position.
                let key = self
                    .queue
                    .iter()
                    .take(2)
                    .find(|(_, video)| Some(video.url.as_str()) != excluding)
                    .map(|(key, _)| *key)?;
                let video = self.queue.remove(&key)?;
                self.queued.remove(&video.url);
                video
            }
        };

        self.active.insert(claimed.url.clone());
        Some(claimed)
    }

    fn release(&mut self, url: &str) -> bool {
        self.active.remove(url)
    }
}

/// Point-in-time copy of the scheduler state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Queued videos in claim order.
    pub queued: Vec<VideoRef>,
    pub live_roster: Vec<String>,
    /// Active URLs, sorted.
    pub active: Vec<String>,
}

/// Thread-safe scheduler handle. Share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct Scheduler {
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue videos in priority order, stable within a priority.
    ///
    /// Videos that are active or already queued are skipped. Live videos join
    /// the live roster either way. Returns how many were newly queued.
    pub fn enqueue<I>(&self, videos: I) -> usize
    where
        I: IntoIterator<Item = VideoRef>,
    {
        let mut state = self.lock();
        videos
            .into_iter()
            .map(|video| state.enqueue(video))
            .filter(|queued| *queued)
            .count()
    }

    /// Atomically pick the next video for a display and mark it active.
    ///
    /// A free live URL wins over anything queued. Otherwise the queue head is
    /// taken, skipping over `excluding` once so a display does not replay what
    /// it just showed.
    ///
    /// `excluding` also applies to the live roster: a display leaving a live
    /// stream moves on to another video even when that stream is still free.
    pub fn claim_next(&self, excluding: Option<&str>) -> Option<VideoRef> {
        self.lock().claim_next(excluding)
    }

    /// Drop `url` from the active set. Unknown URLs are ignored.
    pub fn release(&self, url: &str) -> bool {
        self.lock().release(url)
    }

    /// Release `previous` and claim its successor in one critical section.
    ///
    /// When nothing can be claimed, `previous` stays bound to the caller so no
    /// other display picks it up while it is still the caller's current URL.
    pub fn rotate(&self, previous: Option<&str>) -> Option<VideoRef> {
        let mut state = self.lock();
        if let Some(url) = previous {
            state.release(url);
        }
        match state.claim_next(previous) {
            Some(video) => Some(video),
            None => {
                if let Some(url) = previous {
                    state.active.insert(url.to_string());
                }
                None
            }
        }
    }

    /// Undo a claim whose playback could not be started.
    ///
    /// Releases and requeues `claimed`, then tries to rebind `previous` to the
    /// caller. Returns `true` when `previous` is bound to the caller again, or
    /// when there was no previous URL.
    pub fn restore(&self, claimed: &VideoRef, previous: Option<&str>) -> bool {
        let mut state = self.lock();
        state.release(&claimed.url);
        state.enqueue(claimed.clone());

        match previous {
            None => true,
            Some(url) if state.active.contains(url) => false,
            Some(url) => {
                state.remove_queued(url);
                state.active.insert(url.to_string());
                true
            }
        }
    }

    /// Replace the live roster with `urls`.
    ///
    /// Queued live entries that are no longer live are dropped; the new URLs
    /// are queued as live. Returns how many were newly queued.
    pub fn replace_live(&self, urls: &[String]) -> usize {
        let mut state = self.lock();
        let keep: HashSet<&str> = urls.iter().map(String::as_str).collect();

        let stale: Vec<String> = state
            .live_roster
            .iter()
            .filter(|url| !keep.contains(url.as_str()))
            .cloned()
            .collect();
        for url in &stale {
            let priority = state.queued.get(url).map(|key| key.0);
            if priority == Some(VideoKind::Live.priority()) {
                state.remove_queued(url);
            }
        }

        state.live_roster.clear();
        urls.iter()
            .map(|url| state.enqueue(VideoRef::live(url.as_str())))
            .filter(|queued| *queued)
            .count()
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_active(&self, url: &str) -> bool {
        self.lock().active.contains(url)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.lock();
        let mut active: Vec<String> = state.active.iter().cloned().collect();
        active.sort();
        SchedulerSnapshot {
            queued: state.queue.values().cloned().collect(),
            live_roster: state.live_roster.clone(),
            active,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn claim_url(s: &Scheduler, excluding: Option<&str>) -> Option<String> {
        s.claim_next(excluding).map(|v| v.url)
    }

    #[test]
    fn test_live_before_popular_and_fifo_within_priority() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::popular("P1"), VideoRef::popular("P2")]);
        s.enqueue(vec![VideoRef::live("L1"), VideoRef::live("L2")]);

        assert_eq!(claim_url(&s, None).as_deref(), Some("L1"));
        assert_eq!(claim_url(&s, None).as_deref(), Some("L2"));
        assert_eq!(claim_url(&s, None).as_deref(), Some("P1"));
        assert_eq!(claim_url(&s, None).as_deref(), Some("P2"));
        assert_eq!(claim_url(&s, None), None);
    }

    #[test]
    fn test_enqueue_skips_pending_and_active() {
        let s = Scheduler::new();
        assert_eq!(s.enqueue(vec![VideoRef::popular("P1"), VideoRef::popular("P1")]), 1);

        let claimed = s.claim_next(None).unwrap();
        assert_eq!(claimed.url, "P1");
        assert_eq!(s.enqueue(vec![VideoRef::popular("P1")]), 0);
        assert!(s.is_queue_empty());

        s.release("P1");
        assert_eq!(s.enqueue(vec![VideoRef::popular("P1")]), 1);
    }

    #[test]
    fn test_excluded_head_is_skipped_once_and_kept() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::popular("A"), VideoRef::popular("B")]);

        assert_eq!(claim_url(&s, Some("A")).as_deref(), Some("B"));
        let snap = s.snapshot();
        assert_eq!(snap.queued, vec![VideoRef::popular("A")]);
        assert_eq!(claim_url(&s, None).as_deref(), Some("A"));
    }

    #[test]
    fn test_only_excluded_candidate_yields_none() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::popular("A")]);

        assert_eq!(claim_url(&s, Some("A")), None);
        assert_eq!(s.queue_len(), 1);
        assert!(!s.is_active("A"));
    }

    #[test]
    fn test_released_live_url_preempts_queue() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::live("L1"), VideoRef::popular("P1")]);

        assert_eq!(claim_url(&s, None).as_deref(), Some("L1"));
        s.release("L1");
        // L1 left the queue on claim but is still live.
        assert_eq!(claim_url(&s, None).as_deref(), Some("L1"));
        assert_eq!(claim_url(&s, None).as_deref(), Some("P1"));
    }

    #[test]
    fn test_live_claim_removes_popular_duplicate() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::popular("X"), VideoRef::popular("P1")]);
        s.enqueue(vec![VideoRef::live("X")]);

        let first = s.claim_next(None).unwrap();
        assert_eq!(first.url, "X");
        assert_eq!(first.kind, VideoKind::Live);
        assert_eq!(s.snapshot().queued, vec![VideoRef::popular("P1")]);
    }

    #[test]
    fn test_rotate_moves_to_next_and_frees_previous() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::popular("P1"), VideoRef::popular("P2")]);

        let first = s.rotate(None).unwrap();
        assert_eq!(first.url, "P1");
        let second = s.rotate(Some("P1")).unwrap();
        assert_eq!(second.url, "P2");
        assert!(!s.is_active("P1"));
        assert!(s.is_active("P2"));
    }

    #[test]
    fn test_rotate_leaves_just_shown_live_stream() {
        let s = Scheduler::new();
        s.replace_live(&["L1".to_string()]);
        s.enqueue(vec![VideoRef::popular("P1")]);

        assert_eq!(s.rotate(None), Some(VideoRef::live("L1")));
        assert_eq!(s.rotate(Some("L1")), Some(VideoRef::popular("P1")));
        assert!(!s.is_active("L1"));
        assert!(s.is_active("P1"));
    }

    #[test]
    fn test_rotate_keeps_binding_when_nothing_to_claim() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::live("L1")]);

        assert_eq!(s.rotate(None).unwrap().url, "L1");
        assert_eq!(s.rotate(Some("L1")), None);
        assert!(s.is_active("L1"));
        // Another display cannot take it.
        assert_eq!(s.claim_next(None), None);
    }

    #[test]
    fn test_restore_requeues_claim_and_rebinds_previous() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::popular("P1"), VideoRef::popular("P2")]);
        s.rotate(None);

        let next = s.rotate(Some("P1")).unwrap();
        assert_eq!(next.url, "P2");
        assert!(s.restore(&next, Some("P1")));

        assert!(s.is_active("P1"));
        assert!(!s.is_active("P2"));
        assert_eq!(s.snapshot().queued, vec![VideoRef::popular("P2")]);
    }

    #[test]
    fn test_restore_does_not_steal_from_another_display() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::live("L1"), VideoRef::popular("P1")]);

        let a = s.rotate(None).unwrap();
        assert_eq!(a.url, "L1");
        let a_next = s.rotate(Some("L1")).unwrap();
        assert_eq!(a_next.url, "P1");
        // Display B picks up L1 while A's play is in flight.
        assert_eq!(s.claim_next(None).unwrap().url, "L1");

        assert!(!s.restore(&a_next, Some("L1")));
        assert!(s.is_active("L1"));
    }

    #[test]
    fn test_replace_live_drops_stale_streams() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::live("L1"), VideoRef::live("L2"), VideoRef::popular("P1")]);

        assert_eq!(s.replace_live(&urls(&["L2", "L3"])), 1);

        let snap = s.snapshot();
        assert_eq!(snap.live_roster, urls(&["L2", "L3"]));
        assert_eq!(
            snap.queued.iter().map(|v| v.url.as_str()).collect::<Vec<_>>(),
            vec!["L2", "L3", "P1"]
        );
    }

    #[test]
    fn test_replace_live_keeps_active_stream_in_roster() {
        let s = Scheduler::new();
        s.enqueue(vec![VideoRef::live("L1")]);
        s.claim_next(None);

        assert_eq!(s.replace_live(&urls(&["L1", "L2"])), 1);
        assert_eq!(s.snapshot().live_roster, urls(&["L1", "L2"]));
        assert_eq!(claim_url(&s, None).as_deref(), Some("L2"));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(Vec<(u8, bool)>),
        Claim,
        Release(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec((0u8..12, proptest::bool::ANY), 1..5).prop_map(Op::Enqueue),
            Just(Op::Claim),
            (0u8..12).prop_map(Op::Release),
        ]
    }

    fn url_for(id: u8, live: bool) -> VideoRef {
        if live {
            VideoRef::live(format!("L{}", id))
        } else {
            VideoRef::popular(format!("P{}", id))
        }
    }

    // **Feature: livewall, Property 4: Live Preemption**
    //
    // *For any* sequence of enqueues, claims and releases, whenever a claim
    // returns a popular video every known live URL SHALL already be active.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_live_preempts_popular(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let s = Scheduler::new();
            for op in ops {
                match op {
                    Op::Enqueue(batch) => {
                        s.enqueue(batch.into_iter().map(|(id, live)| url_for(id, live)));
                    }
                    Op::Claim => {
                        if let Some(video) = s.claim_next(None) {
                            if video.kind == VideoKind::Popular {
                                let snap = s.snapshot();
                                for live in &snap.live_roster {
                                    prop_assert!(
                                        snap.active.contains(live),
                                        "popular {} issued while live {} was free",
                                        video.url, live
                                    );
                                }
                            }
                        }
                    }
                    Op::Release(id) => {
                        s.release(&format!("L{}", id));
                        s.release(&format!("P{}", id));
                    }
                }
            }
        }
    }

    // **Feature: livewall, Property 5: Active Uniqueness**
    //
    // *For any* sequence of operations, a claim SHALL never return a URL that is
    // held by someone and has not been released, and the queue SHALL never
    // contain an active URL.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_claims_are_unique_until_released(ops in prop::collection::vec(op_strategy(), 1..60)) {
            let s = Scheduler::new();
            let mut held: HashSet<String> = HashSet::new();
            for op in ops {
                match op {
                    Op::Enqueue(batch) => {
                        s.enqueue(batch.into_iter().map(|(id, live)| url_for(id, live)));
                    }
                    Op::Claim => {
                        if let Some(video) = s.claim_next(None) {
                            prop_assert!(held.insert(video.url.clone()), "{} issued twice", video.url);
                        }
                    }
                    Op::Release(id) => {
                        for url in [format!("L{}", id), format!("P{}", id)] {
                            s.release(&url);
                            held.remove(&url);
                        }
                    }
                }
                let snap = s.snapshot();
                for queued in &snap.queued {
                    prop_assert!(!snap.active.contains(&queued.url));
                }
            }
        }
    }

    #[test]
    fn test_concurrent_claims_never_duplicate() {
        let s = Arc::new(Scheduler::new());
        s.enqueue((0..50).map(|i| VideoRef::live(format!("L{}", i))));
        s.enqueue((0..200).map(|i| VideoRef::popular(format!("P{}", i))));

        let claimed: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let s = Arc::clone(&s);
                    scope.spawn(move || {
                        let mut mine = Vec::new();
                        while let Some(video) = s.claim_next(None) {
                            mine.push(video.url);
                        }
                        mine
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<&String> = claimed.iter().collect();
        assert_eq!(claimed.len(), 250);
        assert_eq!(unique.len(), 250);
    }
}
