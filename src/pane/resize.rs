//! Coalescing of resize requests.
//!
//! Window resizes and divider drags arrive far faster than terminals should
//! be resized. Requests are queued per tab: a new request overwrites the
//! pending one, and a tab becomes due one interval after its first pending
//! request, so a continuous drag still resizes at a steady rate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::tab::TabId;
use crate::layout::Rect;

#[derive(Debug, Clone, Copy)]
struct Pending {
    since: Instant,
    area: Option<Rect>,
}

/// A tab that is due for a geometry pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueResize {
    /// The tab.
    pub tab: TabId,
    /// New container area, if one was requested.
    pub area: Option<Rect>,
}

/// Per-tab queue of pending geometry passes.
#[derive(Debug)]
pub struct ResizeCoalescer {
    interval: Duration,
    pending: HashMap<TabId, Pending>,
}

impl ResizeCoalescer {
    /// Creates a coalescer that flushes each tab at most once per `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: HashMap::new(),
        }
    }

    /// Returns the coalescing interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Queues a container resize, replacing any pending area for the tab.
    pub fn request_area(&mut self, tab: TabId, area: Rect, now: Instant) {
        self.pending
            .entry(tab)
            .and_modify(|pending| pending.area = Some(area))
            .or_insert(Pending {
                since: now,
                area: Some(area),
            });
    }

    /// Queues a geometry pass without a new area (e.g. after a divider drag).
    pub fn mark_dirty(&mut self, tab: TabId, now: Instant) {
        self.pending.entry(tab).or_insert(Pending {
            since: now,
            area: None,
        });
    }

    /// Checks if a tab has a pending pass.
    #[must_use]
    pub fn is_pending(&self, tab: TabId) -> bool {
        self.pending.contains_key(&tab)
    }

    /// Returns the number of tabs with a pending pass.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns every tab whose interval has elapsed at `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<DueResize> {
        let interval = self.interval;
        let mut due: Vec<DueResize> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.since) >= interval)
            .map(|(tab, pending)| DueResize {
                tab: *tab,
                area: pending.area,
            })
            .collect();
        due.sort_by_key(|resize| resize.tab);
        for resize in &due {
            self.pending.remove(&resize.tab);
        }
        due
    }

    /// Removes and returns every pending pass regardless of timing.
    pub fn take_all(&mut self) -> Vec<DueResize> {
        let mut all: Vec<DueResize> = self
            .pending
            .drain()
            .map(|(tab, pending)| DueResize {
                tab,
                area: pending.area,
            })
            .collect();
        all.sort_by_key(|resize| resize.tab);
        all
    }

    /// Drops any pending pass for a tab.
    pub fn cancel(&mut self, tab: TabId) {
        self.pending.remove(&tab);
    }
}
