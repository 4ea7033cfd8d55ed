//! Visible range → active chunk set, with debouncing.

use crate::domain::{ChunkId, Position};
use crate::scheme::IndexScheme;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Inclusive span of domain positions currently on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleRange {
    pub from: Position,
    pub to: Position,
}

impl VisibleRange {
    /// Endpoints are swapped if given in reverse.
    pub fn new(from: Position, to: Position) -> Self {
        Self {
            from: from.min(to),
            to: from.max(to),
        }
    }

    pub fn contains(&self, pos: Position) -> bool {
        (self.from..=self.to).contains(&pos)
    }

    /// Number of positions covered.
    pub fn span(&self) -> i64 {
        self.to.saturating_sub(self.from).saturating_add(1)
    }
}

/// Sorted, contiguous chunk ids intersecting a visible range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveChunkSet {
    ids: Vec<ChunkId>,
}

impl ActiveChunkSet {
    pub fn ids(&self) -> &[ChunkId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn first(&self) -> Option<ChunkId> {
        self.ids.first().copied()
    }

    pub fn last(&self) -> Option<ChunkId> {
        self.ids.last().copied()
    }

    /// Change detection: first id, last id and length.
    pub fn same_window(&self, other: &ActiveChunkSet) -> bool {
        self.first() == other.first() && self.last() == other.last() && self.len() == other.len()
    }
}

/// `[chunk(from) ..= chunk(to)]` widened by `margin` chunks on each side and
/// clipped to the scheme's valid ids.
pub fn active_chunks(
    scheme: &dyn IndexScheme,
    range: &VisibleRange,
    margin: usize,
) -> ActiveChunkSet {
    let bounds = scheme.bounds();
    let mut first = scheme.position_to_chunk_id(range.from);
    let mut last = scheme.position_to_chunk_id(range.to);
    for _ in 0..margin {
        if first > *bounds.start() {
            first = scheme.previous_chunk_id(first);
        }
        if last < *bounds.end() {
            last = scheme.next_chunk_id(last);
        }
    }

    let first = first.max(*bounds.start());
    let last = last.min(*bounds.end());
    let mut ids = Vec::new();
    let mut id = first;
    while id <= last {
        ids.push(id);
        let next = scheme.next_chunk_id(id);
        if next <= id {
            break;
        }
        id = next;
    }
    ActiveChunkSet { ids }
}

/// Debounces visible-range changes and reports when the active set moves.
#[derive(Debug)]
pub struct VisibleRangeTracker {
    debounce: Duration,
    margin: usize,
    pending: Option<(VisibleRange, Instant)>,
    current: Option<VisibleRange>,
    active: Option<ActiveChunkSet>,
}

impl VisibleRangeTracker {
    pub fn new(debounce: Duration, margin: usize) -> Self {
        Self {
            debounce,
            margin,
            pending: None,
            current: None,
            active: None,
        }
    }

    /// Record a range change; only the latest one within the quiet period counts.
    pub fn observe(&mut self, range: VisibleRange, at: Instant) {
        self.pending = Some((range, at));
    }

    /// Settle the pending range once the quiet period has passed. Returns the
    /// new active set when its window changed.
    pub fn poll(&mut self, scheme: &dyn IndexScheme, now: Instant) -> Option<ActiveChunkSet> {
        let (_, at) = self.pending?;
        if now.saturating_duration_since(at) < self.debounce {
            return None;
        }
        self.flush(scheme)
    }

    /// Settle the pending range immediately.
    pub fn flush(&mut self, scheme: &dyn IndexScheme) -> Option<ActiveChunkSet> {
        let (range, _) = self.pending.take()?;
        self.current = Some(range);
        let next = active_chunks(scheme, &range, self.margin);
        if self.active.as_ref().is_some_and(|a| a.same_window(&next)) {
            return None;
        }
        self.active = Some(next.clone());
        Some(next)
    }

    /// Forget the active set so the next settle reports it again.
    pub fn invalidate(&mut self) {
        self.active = None;
        if let Some(range) = self.current {
            self.pending.get_or_insert((range, Instant::now()));
        }
    }

    pub fn current(&self) -> Option<VisibleRange> {
        self.current
    }

    pub fn active(&self) -> Option<&ActiveChunkSet> {
        self.active.as_ref()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{date_to_position, DateScheme, HeightScheme};
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> Position {
        date_to_position(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn date_range_maps_to_years() {
        let scheme = DateScheme::new(2009, 2025);
        let set = active_chunks(&scheme, &VisibleRange::new(day(2021, 6, 1), day(2022, 2, 1)), 0);
        assert_eq!(set.ids(), &[ChunkId(2021), ChunkId(2022)]);
    }

    #[test]
    fn height_range_maps_to_buckets() {
        let scheme = HeightScheme::new(10_000);
        let set = active_chunks(&scheme, &VisibleRange::new(850_500, 901_200), 0);
        let expected: Vec<ChunkId> = (850_000..=900_000).step_by(10_000).map(ChunkId).collect();
        assert_eq!(set.ids(), expected.as_slice());
    }

    #[test]
    fn range_is_clipped_to_bounds() {
        let scheme = DateScheme::new(2009, 2025);
        let set = active_chunks(&scheme, &VisibleRange::new(day(2005, 1, 1), day(2010, 3, 1)), 0);
        assert_eq!(set.ids(), &[ChunkId(2009), ChunkId(2010)]);

        let set = active_chunks(&scheme, &VisibleRange::new(day(2030, 1, 1), day(2031, 1, 1)), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn margin_adds_neighbours() {
        let scheme = HeightScheme::new(10_000);
        let set = active_chunks(&scheme, &VisibleRange::new(25_000, 25_001), 1);
        assert_eq!(set.ids(), &[ChunkId(10_000), ChunkId(20_000), ChunkId(30_000)]);

        let set = active_chunks(&scheme, &VisibleRange::new(0, 5), 2);
        assert_eq!(set.first(), Some(ChunkId(0)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn reversed_range_is_normalised() {
        assert_eq!(VisibleRange::new(9, 3), VisibleRange::new(3, 9));
    }

    #[test]
    fn tracker_waits_for_quiet_period() {
        let scheme = HeightScheme::new(10_000);
        let mut tracker = VisibleRangeTracker::new(Duration::from_millis(100), 0);
        let t = Instant::now();

        tracker.observe(VisibleRange::new(0, 5_000), t);
        assert!(tracker.poll(&scheme, t + Duration::from_millis(50)).is_none());
        tracker.observe(VisibleRange::new(0, 15_000), t + Duration::from_millis(60));
        assert!(tracker.poll(&scheme, t + Duration::from_millis(120)).is_none());

        let set = tracker.poll(&scheme, t + Duration::from_millis(160)).unwrap();
        assert_eq!(set.ids(), &[ChunkId(0), ChunkId(10_000)]);
        assert_eq!(tracker.current(), Some(VisibleRange::new(0, 15_000)));
    }

    #[test]
    fn tracker_ignores_moves_inside_the_same_window() {
        let scheme = HeightScheme::new(10_000);
        let mut tracker = VisibleRangeTracker::new(Duration::ZERO, 0);
        let t = Instant::now();

        tracker.observe(VisibleRange::new(100, 9_000), t);
        assert!(tracker.poll(&scheme, t).is_some());
        tracker.observe(VisibleRange::new(200, 9_500), t);
        assert!(tracker.poll(&scheme, t).is_none());
        assert_eq!(tracker.current(), Some(VisibleRange::new(200, 9_500)));

        tracker.invalidate();
        assert!(tracker.flush(&scheme).is_some());
    }
}
