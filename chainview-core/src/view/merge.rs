//! Incremental merge: raw `(positions, values)` columns → render points.
//!
//! A first load builds every point. Later merges of a superset of the same
//! raw data only touch the tail: a binary search finds where the last
//! rendered bucket starts in the raw columns, that bucket is rebuilt, and
//! everything after it is appended. Already-rendered points before the tail
//! are never revisited.

use crate::domain::{PointValue, Position, RawSeries, RenderPoint, ValueShape};
use crate::scheme::{date_to_position, position_to_date};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How raw positions map onto output positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucketing {
    /// One output point per raw position.
    #[default]
    Identity,
    /// Date positions, grouped by ISO week (Monday start).
    Week,
    /// Date positions, grouped by calendar month.
    Month,
    /// Fixed-width buckets of `n` positions.
    Fixed(i64),
}

impl Bucketing {
    /// Output position of a raw position. Monotonic.
    pub fn bucket(self, pos: Position) -> Position {
        match self {
            Bucketing::Identity => pos,
            // 1970-01-01 was a Thursday.
            Bucketing::Week => pos - (pos + 3).rem_euclid(7),
            Bucketing::Month => position_to_date(pos)
                .and_then(|d| d.with_day(1))
                .map_or(pos, date_to_position),
            Bucketing::Fixed(n) if n > 1 => pos.div_euclid(n) * n,
            Bucketing::Fixed(_) => pos,
        }
    }
}

impl fmt::Display for Bucketing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucketing::Identity => f.write_str("identity"),
            Bucketing::Week => f.write_str("week"),
            Bucketing::Month => f.write_str("month"),
            Bucketing::Fixed(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for Bucketing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" | "none" | "day" => Ok(Bucketing::Identity),
            "week" => Ok(Bucketing::Week),
            "month" => Ok(Bucketing::Month),
            other => other
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .map(Bucketing::Fixed)
                .ok_or_else(|| {
                    format!("unknown bucketing '{s}' (identity, week, month or a width)")
                }),
        }
    }
}

/// Points already handed to a sink, plus what the next merge needs to stay
/// incremental.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSeries {
    points: Vec<RenderPoint>,
    shape: Option<ValueShape>,
    /// Raw index where the anchor point's bucket starts.
    tail_start: usize,
    /// Trailing points appended by live ticks and not yet covered by raw data.
    live_points: usize,
}

/// What a merge changed.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Nothing new to draw.
    Unchanged,
    /// Everything was rebuilt; push the whole point list.
    Replaced,
    /// Only these points changed or were appended, in order.
    Updated(Vec<RenderPoint>),
}

impl MergedSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[RenderPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&RenderPoint> {
        self.points.last()
    }

    pub fn shape(&self) -> Option<ValueShape> {
        self.shape
    }

    /// Number of trailing points that only exist because of live ticks.
    pub fn live_points(&self) -> usize {
        self.live_points
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Live-bridge hook: overwrite the last point in place.
    pub(crate) fn replace_last(&mut self, point: RenderPoint) {
        if let Some(last) = self.points.last_mut() {
            *last = point;
        }
    }

    /// Live-bridge hook: append a point past the last one.
    pub(crate) fn push(&mut self, point: RenderPoint) {
        self.points.push(point);
        self.live_points += 1;
    }

    /// Index of the last point derived from raw data.
    fn anchor_index(&self) -> Option<usize> {
        self.points.len().checked_sub(self.live_points + 1)
    }

    /// Merge `raw` into the held points.
    ///
    /// Live points past the end of `raw` survive; raw data covering their
    /// bucket supersedes them.
    pub fn merge(&mut self, raw: &RawSeries, bucketing: Bucketing) -> MergeOutcome {
        if raw.is_empty() {
            return MergeOutcome::Unchanged;
        }
        let Some(anchor_idx) = self.anchor_index() else {
            return self.rebuild(raw, bucketing);
        };
        if self.shape != Some(raw.shape()) {
            return self.rebuild(raw, bucketing);
        }

        let anchor = self.points[anchor_idx];
        let start = raw
            .positions
            .partition_point(|p| bucketing.bucket(*p) < anchor.position);
        let first_bucket = bucketing.bucket(raw.positions[0]);
        if start != self.tail_start || first_bucket != self.points[0].position {
            // Raw data was inserted before the tail (an older chunk landed late).
            return self.rebuild(raw, bucketing);
        }

        let fresh = coalesce(raw, start, bucketing);
        let Some(fresh_end) = fresh.last().map(|p| p.position) else {
            return self.rebuild(raw, bucketing);
        };

        let held = self.points.split_off(anchor_idx);
        let live: Vec<RenderPoint> = held[1..]
            .iter()
            .copied()
            .filter(|p| p.position > fresh_end)
            .collect();
        self.live_points = live.len();
        self.points.extend(fresh);
        self.points.extend(live);
        self.tail_start = self.anchor_start(raw, bucketing);

        let tail = &self.points[anchor_idx..];
        let emitted: Vec<RenderPoint> = tail
            .iter()
            .copied()
            .filter(|p| !held.iter().any(|h| same_point(h, p)))
            .collect();
        let held_end = held.last().map_or(anchor.position, |p| p.position);
        let lost_point = held
            .iter()
            .any(|h| !tail.iter().any(|p| p.position == h.position));

        match emitted.first() {
            _ if lost_point => MergeOutcome::Replaced,
            None => MergeOutcome::Unchanged,
            Some(first) if first.position < held_end => MergeOutcome::Replaced,
            Some(_) => MergeOutcome::Updated(emitted),
        }
    }

    fn rebuild(&mut self, raw: &RawSeries, bucketing: Bucketing) -> MergeOutcome {
        let mut points = coalesce(raw, 0, bucketing);
        let mut live_points = 0;
        if self.shape == Some(raw.shape()) {
            let end = points.last().map(|p| p.position);
            let from = self.points.len().saturating_sub(self.live_points);
            for point in &self.points[from..] {
                if end.map_or(true, |end| point.position > end) {
                    points.push(*point);
                    live_points += 1;
                }
            }
        }
        let unchanged = points == self.points && self.shape == Some(raw.shape());
        self.points = points;
        self.live_points = live_points;
        self.shape = Some(raw.shape());
        self.tail_start = self.anchor_start(raw, bucketing);
        if unchanged {
            MergeOutcome::Unchanged
        } else {
            MergeOutcome::Replaced
        }
    }

    /// Raw index where the anchor point's bucket starts.
    fn anchor_start(&self, raw: &RawSeries, bucketing: Bucketing) -> usize {
        self.anchor_index().map_or(0, |i| {
            let anchor = self.points[i].position;
            raw.positions.partition_point(|p| bucketing.bucket(*p) < anchor)
        })
    }
}

fn same_point(a: &RenderPoint, b: &RenderPoint) -> bool {
    a.position == b.position && a.value.same_as(&b.value)
}

/// Build points from `raw[start..]`, folding entries that share a bucket:
/// scalars keep the last write, OHLC entries are absorbed.
fn coalesce(raw: &RawSeries, start: usize, bucketing: Bucketing) -> Vec<RenderPoint> {
    let mut out: Vec<RenderPoint> = Vec::with_capacity(raw.len().saturating_sub(start));
    for (i, &pos) in raw.positions.iter().enumerate().skip(start) {
        let Some(value) = raw.values.get(i) else {
            break;
        };
        let position = bucketing.bucket(pos);
        match out.last_mut() {
            Some(prev) if prev.position == position => match (&mut prev.value, value) {
                (PointValue::Ohlc(acc), PointValue::Ohlc(next)) => acc.absorb(&next),
                (slot, value) => *slot = value,
            },
            _ => out.push(RenderPoint { position, value }),
        }
    }
    out
}

/// One-shot merge against an empty history.
pub fn merge_all(raw: &RawSeries, bucketing: Bucketing) -> Vec<RenderPoint> {
    coalesce(raw, 0, bucketing)
}
