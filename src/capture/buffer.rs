//! Bounded, time-windowed store of recent captures.
//!
//! The size bound is enforced on every `add`. Age-based eviction only runs
//! when the capture cycle calls [`CaptureBuffer::evict`], which keeps the
//! `add` path cheap.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::BufferConfig;

/// An encoded capture (a `data:` URL), shared without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturePayload(Arc<str>);

impl CapturePayload {
    pub fn new(data: impl Into<Arc<str>>) -> Self {
        Self(data.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CapturePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapturePayload({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureItem {
    pub payload: CapturePayload,
    pub captured_at: Instant,
}

impl CaptureItem {
    pub fn now(payload: CapturePayload) -> Self {
        Self {
            payload,
            captured_at: Instant::now(),
        }
    }
}

/// Buffer occupancy summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub count: usize,
    pub max_items: usize,
    pub oldest: Option<Instant>,
    pub newest: Option<Instant>,
}

/// Buffer shared between the capture cycle and request handling.
pub type SharedBuffer = Arc<Mutex<CaptureBuffer>>;

#[derive(Debug)]
pub struct CaptureBuffer {
    items: VecDeque<CaptureItem>,
    max_items: usize,
    retention: Duration,
}

impl CaptureBuffer {
    /// `max_items` is raised to at least one.
    pub fn new(max_items: usize, retention: Duration) -> Self {
        let max_items = max_items.max(1);
        Self {
            items: VecDeque::with_capacity(max_items),
            max_items,
            retention,
        }
    }

    pub fn from_config(config: &BufferConfig) -> Self {
        Self::new(config.max_items, config.retention())
    }

    pub fn shared(self) -> SharedBuffer {
        Arc::new(Mutex::new(self))
    }

    /// Append, dropping the oldest items beyond `max_items`.
    pub fn add(&mut self, item: CaptureItem) {
        self.items.push_back(item);
        while self.items.len() > self.max_items {
            self.items.pop_front();
        }
    }

    /// Remove items older than the retention window. Returns how many went.
    pub fn evict(&mut self, now: Instant) -> usize {
        let before = self.items.len();
        let retention = self.retention;
        self.items
            .retain(|item| now.saturating_duration_since(item.captured_at) <= retention);
        before - self.items.len()
    }

    /// Up to `count` items, most recent first. `None` means all of them.
    pub fn items(&self, count: Option<usize>) -> Vec<CaptureItem> {
        let take = count.unwrap_or(self.items.len());
        self.items.iter().rev().take(take).cloned().collect()
    }

    pub fn latest(&self) -> Option<&CaptureItem> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            count: self.items.len(),
            max_items: self.max_items,
            oldest: self.items.front().map(|i| i.captured_at),
            newest: self.items.back().map(|i| i.captured_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(label: &str, captured_at: Instant) -> CaptureItem {
        CaptureItem {
            payload: CapturePayload::new(label),
            captured_at,
        }
    }

    fn labels(items: &[CaptureItem]) -> Vec<&str> {
        items.iter().map(|i| i.payload.as_str()).collect()
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let start = Instant::now();
        let mut buffer = CaptureBuffer::new(5, Duration::from_secs(300));
        for n in 1..=7 {
            buffer.add(item(&n.to_string(), start + Duration::from_secs(n)));
        }
        assert_eq!(buffer.len(), 5);

        let mut chronological = buffer.items(None);
        chronological.reverse();
        assert_eq!(labels(&chronological), ["3", "4", "5", "6", "7"]);
    }

    #[test]
    fn test_items_are_most_recent_first_and_limited() {
        let start = Instant::now();
        let mut buffer = CaptureBuffer::new(5, Duration::from_secs(300));
        for n in 1..=4 {
            buffer.add(item(&n.to_string(), start + Duration::from_secs(n)));
        }
        assert_eq!(labels(&buffer.items(Some(2))), ["4", "3"]);
        assert_eq!(labels(&buffer.items(Some(10))), ["4", "3", "2", "1"]);
        assert_eq!(buffer.latest().map(|i| i.payload.as_str()), Some("4"));
    }

    #[test]
    fn test_evict_removes_only_expired() {
        let start = Instant::now();
        let mut buffer = CaptureBuffer::new(5, Duration::from_secs(300));
        buffer.add(item("old", start));
        buffer.add(item("edge", start + Duration::from_secs(100)));
        buffer.add(item("new", start + Duration::from_secs(350)));

        let removed = buffer.evict(start + Duration::from_secs(400));
        assert_eq!(removed, 1);
        assert_eq!(labels(&buffer.items(None)), ["new", "edge"]);
    }

    #[test]
    fn test_add_does_not_evict_by_age() {
        let start = Instant::now();
        let mut buffer = CaptureBuffer::new(5, Duration::from_secs(1));
        buffer.add(item("a", start));
        buffer.add(item("b", start + Duration::from_secs(10)));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_clear_and_info() {
        let start = Instant::now();
        let mut buffer = CaptureBuffer::new(3, Duration::from_secs(300));
        assert_eq!(
            buffer.info(),
            BufferInfo {
                count: 0,
                max_items: 3,
                oldest: None,
                newest: None
            }
        );
        buffer.add(item("a", start));
        buffer.add(item("b", start + Duration::from_secs(5)));
        let info = buffer.info();
        assert_eq!(info.count, 2);
        assert_eq!(info.oldest, Some(start));
        assert_eq!(info.newest, Some(start + Duration::from_secs(5)));

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut buffer = CaptureBuffer::new(0, Duration::from_secs(1));
        buffer.add(item("a", Instant::now()));
        buffer.add(item("b", Instant::now()));
        assert_eq!(labels(&buffer.items(None)), ["b"]);
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity(max in 1usize..16, adds in 0usize..64) {
            let start = Instant::now();
            let mut buffer = CaptureBuffer::new(max, Duration::from_secs(300));
            for n in 0..adds {
                buffer.add(item("x", start + Duration::from_millis(n as u64)));
                prop_assert!(buffer.len() <= max);
            }
            prop_assert_eq!(buffer.len(), adds.min(max));
        }

        #[test]
        fn evict_leaves_nothing_expired(
            offsets in proptest::collection::vec(0u64..1_000, 0..20),
            now_offset in 0u64..1_500,
        ) {
            let start = Instant::now();
            let retention = Duration::from_secs(300);
            let mut buffer = CaptureBuffer::new(32, retention);
            for offset in &offsets {
                buffer.add(item("x", start + Duration::from_secs(*offset)));
            }
            let now = start + Duration::from_secs(now_offset);
            buffer.evict(now);
            for kept in buffer.items(None) {
                prop_assert!(now.saturating_duration_since(kept.captured_at) <= retention);
            }
        }
    }
}
