//! Pane/series sync: keeps every pane's sink in lockstep.
//!
//! Range and crosshair changes are queued and mirrored to every pane except
//! the one they came from on the next [`PaneSync::flush_frame`]. Layout
//! (collapse and relocation), candle/line degradation and min/max markers are
//! recomputed on demand by the chart.

use super::merge::{MergeOutcome, MergedSeries};
use super::range::VisibleRange;
use super::sink::{Marker, MarkerKind, RenderSink, Representation, SeriesId};
use crate::domain::{Position, RenderPoint, ValueShape};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaneId(pub usize);

impl PaneId {
    pub const PRIMARY: PaneId = PaneId(0);
}

struct Pane {
    sink: Box<dyn RenderSink>,
    collapsed: bool,
}

struct SeriesView {
    home: PaneId,
    placed: PaneId,
    visible: bool,
    merged: MergedSeries,
    representation: Representation,
    markers: Vec<Marker>,
}

impl SeriesView {
    fn is_active(&self) -> bool {
        self.visible && !self.merged.is_empty()
    }

    fn is_price(&self) -> bool {
        self.merged.shape() == Some(ValueShape::Ohlc)
    }

    fn rendered(&self) -> Vec<RenderPoint> {
        render_points(self.merged.points(), self.representation)
    }
}

fn render_points(points: &[RenderPoint], representation: Representation) -> Vec<RenderPoint> {
    match representation {
        Representation::Candles => points.to_vec(),
        Representation::Line => points.iter().map(RenderPoint::as_line).collect(),
    }
}

fn render_point(point: RenderPoint, representation: Representation) -> RenderPoint {
    match representation {
        Representation::Candles => point,
        Representation::Line => point.as_line(),
    }
}

pub struct PaneSync {
    panes: Vec<Pane>,
    series: Vec<SeriesView>,
    queued_range: Option<(PaneId, VisibleRange)>,
    queued_crosshair: Option<(PaneId, Option<Position>)>,
    line_threshold: usize,
    zoom_throttle: Duration,
    last_zoom_eval: Option<Instant>,
    pending_bars: Option<usize>,
    visible_bars: Option<usize>,
}

impl PaneSync {
    /// `primary` becomes pane 0.
    pub fn new(
        primary: Box<dyn RenderSink>,
        line_threshold: usize,
        zoom_throttle: Duration,
    ) -> Self {
        Self {
            panes: vec![Pane {
                sink: primary,
                collapsed: false,
            }],
            series: Vec::new(),
            queued_range: None,
            queued_crosshair: None,
            line_threshold,
            zoom_throttle,
            last_zoom_eval: None,
            pending_bars: None,
            visible_bars: None,
        }
    }

    pub fn add_pane(&mut self, sink: Box<dyn RenderSink>) -> PaneId {
        self.panes.push(Pane {
            sink,
            collapsed: false,
        });
        PaneId(self.panes.len() - 1)
    }

    pub fn pane_count(&self) -> usize {
        self.panes.len()
    }

    /// Register a series whose home is `pane`. Unknown panes fall back to the
    /// primary one.
    pub fn add_series(&mut self, pane: PaneId) -> SeriesId {
        let home = if pane.0 < self.panes.len() {
            pane
        } else {
            PaneId::PRIMARY
        };
        self.series.push(SeriesView {
            home,
            placed: home,
            visible: true,
            merged: MergedSeries::new(),
            representation: Representation::Candles,
            markers: Vec::new(),
        });
        SeriesId(self.series.len() - 1)
    }

    pub fn set_visible(&mut self, series: SeriesId, visible: bool) {
        if let Some(view) = self.series.get_mut(series.0) {
            view.visible = visible;
        }
    }

    pub fn merged(&self, series: SeriesId) -> Option<&MergedSeries> {
        self.series.get(series.0).map(|v| &v.merged)
    }

    pub fn merged_mut(&mut self, series: SeriesId) -> Option<&mut MergedSeries> {
        self.series.get_mut(series.0).map(|v| &mut v.merged)
    }

    /// Pane a series is currently drawn on.
    pub fn placement(&self, series: SeriesId) -> Option<PaneId> {
        self.series.get(series.0).map(|v| v.placed)
    }

    pub fn representation(&self, series: SeriesId) -> Option<Representation> {
        self.series.get(series.0).map(|v| v.representation)
    }

    pub fn is_collapsed(&self, pane: PaneId) -> bool {
        self.panes.get(pane.0).is_some_and(|p| p.collapsed)
    }

    pub fn markers(&self, series: SeriesId) -> &[Marker] {
        self.series.get(series.0).map_or(&[], |v| v.markers.as_slice())
    }

    /// Forward a merge result to the series' sink.
    pub fn publish(&mut self, series: SeriesId, outcome: &MergeOutcome) {
        let Some(view) = self.series.get_mut(series.0) else {
            return;
        };
        if !view.is_price() {
            view.representation = Representation::Line;
        } else if let Some(bars) = self.visible_bars {
            view.representation = representation_for(bars, self.line_threshold);
        }
        let sink = &mut self.panes[view.placed.0].sink;
        match outcome {
            MergeOutcome::Unchanged => {}
            MergeOutcome::Replaced => {
                sink.set_representation(series, view.representation);
                sink.set_data(series, &view.rendered());
            }
            MergeOutcome::Updated(points) => {
                for point in points {
                    sink.update(series, render_point(*point, view.representation));
                }
            }
        }
    }

    /// Forward a single in-place or appended point (live ticks).
    pub fn publish_point(&mut self, series: SeriesId, point: RenderPoint) {
        if let Some(view) = self.series.get(series.0) {
            let point = render_point(point, view.representation);
            self.panes[view.placed.0].sink.update(series, point);
        }
    }

    pub fn queue_range(&mut self, origin: PaneId, range: VisibleRange) {
        self.queued_range = Some((origin, range));
    }

    pub fn queue_crosshair(&mut self, origin: PaneId, position: Option<Position>) {
        self.queued_crosshair = Some((origin, position));
    }

    /// Mirror queued range and crosshair to every pane but their origin.
    pub fn flush_frame(&mut self) {
        if let Some((origin, range)) = self.queued_range.take() {
            for (i, pane) in self.panes.iter_mut().enumerate() {
                if PaneId(i) != origin {
                    pane.sink.set_visible_range(range);
                }
            }
        }
        if let Some((origin, position)) = self.queued_crosshair.take() {
            for (i, pane) in self.panes.iter_mut().enumerate() {
                if PaneId(i) != origin {
                    pane.sink.set_crosshair(position);
                }
            }
        }
    }

    /// Recompute placement and collapse state from series activity.
    pub fn relayout(&mut self) {
        let primary_active = self
            .series
            .iter()
            .any(|s| s.home == PaneId::PRIMARY && s.is_active());
        let mut active_homes: Vec<PaneId> = self
            .series
            .iter()
            .filter(|s| s.home != PaneId::PRIMARY && s.is_active())
            .map(|s| s.home)
            .collect();
        active_homes.sort();
        active_homes.dedup();

        let borrowed = match active_homes.as_slice() {
            [only] if !primary_active => Some(*only),
            _ => None,
        };

        for (i, view) in self.series.iter_mut().enumerate() {
            let target = if Some(view.home) == borrowed {
                PaneId::PRIMARY
            } else {
                view.home
            };
            if target == view.placed {
                continue;
            }
            debug!(series = i, from = view.placed.0, to = target.0, "relocating series");
            let id = SeriesId(i);
            self.panes[view.placed.0].sink.remove_series(id);
            view.placed = target;
            view.markers.clear();
            let sink = &mut self.panes[target.0].sink;
            sink.set_representation(id, view.representation);
            sink.set_data(id, &view.rendered());
        }

        for (i, pane) in self.panes.iter_mut().enumerate() {
            let occupied = self
                .series
                .iter()
                .any(|s| s.placed == PaneId(i) && s.is_active());
            if pane.collapsed == occupied {
                pane.collapsed = !occupied;
                pane.sink.set_collapsed(pane.collapsed);
            }
        }
    }

    /// Record a zoom change; evaluated at most once per throttle interval.
    pub fn on_zoom(&mut self, visible_bars: usize, now: Instant) {
        self.pending_bars = Some(visible_bars);
        self.poll_zoom(now);
    }

    /// Evaluate a pending zoom change if the throttle allows it.
    pub fn poll_zoom(&mut self, now: Instant) {
        let Some(bars) = self.pending_bars else {
            return;
        };
        if self
            .last_zoom_eval
            .is_some_and(|at| now.saturating_duration_since(at) < self.zoom_throttle)
        {
            return;
        }
        self.pending_bars = None;
        self.last_zoom_eval = Some(now);
        self.visible_bars = Some(bars);

        let wanted = representation_for(bars, self.line_threshold);
        for (i, view) in self.series.iter_mut().enumerate() {
            if !view.is_price() || view.representation == wanted {
                continue;
            }
            view.representation = wanted;
            let sink = &mut self.panes[view.placed.0].sink;
            sink.set_representation(SeriesId(i), wanted);
            sink.set_data(SeriesId(i), &view.rendered());
        }
    }

    /// Place min/max markers per pane over `range`, shrunk by `inset`
    /// positions on both sides.
    pub fn update_markers(&mut self, range: VisibleRange, inset: i64) {
        let from = range.from.saturating_add(inset);
        let to = range.to.saturating_sub(inset);

        for pane in 0..self.panes.len() {
            let pane = PaneId(pane);
            let mut min: Option<(usize, Position, f64)> = None;
            let mut max: Option<(usize, Position, f64)> = None;

            for (i, view) in self.series.iter().enumerate() {
                if view.placed != pane || !view.is_active() {
                    continue;
                }
                let points = view.merged.points();
                let lo = points.partition_point(|p| p.position < from);
                let hi = points.partition_point(|p| p.position <= to);
                for point in points.get(lo..hi).unwrap_or(&[]) {
                    let low = point.value.low();
                    let high = point.value.high();
                    if !low.is_nan() && min.map_or(true, |(_, _, m)| low < m) {
                        min = Some((i, point.position, low));
                    }
                    if !high.is_nan() && max.map_or(true, |(_, _, m)| high > m) {
                        max = Some((i, point.position, high));
                    }
                }
            }

            let mut wanted: Vec<(usize, Vec<Marker>)> = Vec::new();
            let mut add = |series: usize, marker: Marker| {
                match wanted.iter_mut().find(|(s, _)| *s == series) {
                    Some((_, markers)) => markers.push(marker),
                    None => wanted.push((series, vec![marker])),
                }
            };
            if let Some((series, position, value)) = min {
                let kind = MarkerKind::Up;
                add(series, Marker { position, kind, value });
            }
            if let Some((series, position, value)) = max {
                let kind = MarkerKind::Down;
                add(series, Marker { position, kind, value });
            }
            for (_, markers) in &mut wanted {
                markers.sort_by_key(|m| m.position);
            }

            for (i, view) in self.series.iter_mut().enumerate() {
                if view.placed != pane {
                    continue;
                }
                let next = wanted
                    .iter()
                    .find(|(s, _)| *s == i)
                    .map(|(_, m)| m.clone())
                    .unwrap_or_default();
                if next != view.markers {
                    self.panes[pane.0].sink.set_markers(SeriesId(i), &next);
                    view.markers = next;
                }
            }
        }
    }
}

fn representation_for(visible_bars: usize, threshold: usize) -> Representation {
    if visible_bars > threshold {
        Representation::Line
    } else {
        Representation::Candles
    }
}
