//! Chart: ties the engine's series to panes, the range tracker and the live
//! bridge.
//!
//! The chart is driven by the owner's frame loop: UI events (`on_visible_range`,
//! `on_crosshair`, `on_zoom`) are recorded immediately and acted on in
//! [`Chart::tick`], which also applies finished fetches and pushes merged
//! points to the sinks.

use super::live::{apply_tick, LiveOutcome, Tick};
use super::merge::{Bucketing, MergeOutcome};
use super::pane::{PaneId, PaneSync};
use super::range::{ActiveChunkSet, VisibleRange, VisibleRangeTracker};
use super::sink::{Marker, RenderSink, Representation, SeriesId};
use crate::config::EngineConfig;
use crate::domain::{MetricKey, Position, RenderPoint, SchemeKind};
use crate::engine::{Engine, EngineError, Revision};
use chrono::{DateTime, Utc};
use std::sync::mpsc::Receiver;
use std::time::Instant;
use tracing::debug;

struct Binding {
    key: MetricKey,
    updates: Receiver<Revision>,
}

/// What one [`Chart::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Completions applied to the engine.
    pub applied: usize,
    /// Active set that settled during this tick, if it changed.
    pub active_changed: Option<ActiveChunkSet>,
    /// Series whose points were re-merged.
    pub refreshed: Vec<SeriesId>,
}

pub struct Chart {
    scheme: SchemeKind,
    bucketing: Bucketing,
    tracker: VisibleRangeTracker,
    panes: PaneSync,
    bindings: Vec<Binding>,
    marker_inset_px: f64,
    viewport_width_px: f64,
    layout_dirty: bool,
}

impl Chart {
    pub fn new(config: &EngineConfig, scheme: SchemeKind, primary: Box<dyn RenderSink>) -> Self {
        Self {
            scheme,
            bucketing: Bucketing::Identity,
            tracker: VisibleRangeTracker::new(config.debounce(), config.margin_chunks),
            panes: PaneSync::new(primary, config.line_threshold_bars, config.zoom_throttle()),
            bindings: Vec::new(),
            marker_inset_px: config.marker_inset_px,
            viewport_width_px: 0.0,
            layout_dirty: true,
        }
    }

    pub fn scheme(&self) -> SchemeKind {
        self.scheme
    }

    pub fn bucketing(&self) -> Bucketing {
        self.bucketing
    }

    pub fn add_pane(&mut self, sink: Box<dyn RenderSink>) -> PaneId {
        self.panes.add_pane(sink)
    }

    /// Attach a metric to a pane. The series immediately shows whatever the
    /// engine already holds and fetches the current active set.
    pub fn add_series(
        &mut self,
        engine: &mut Engine,
        key: MetricKey,
        pane: PaneId,
        now: DateTime<Utc>,
    ) -> Result<SeriesId, EngineError> {
        if key.scheme != self.scheme {
            return Err(EngineError::SchemeMismatch {
                expected: self.scheme,
                found: key.scheme,
            });
        }
        let updates = engine.subscribe(&key);
        let id = self.panes.add_series(pane);
        self.bindings.push(Binding {
            key: key.clone(),
            updates,
        });
        self.refresh(engine, id);
        if let Some(active) = self.tracker.active().cloned() {
            engine.fetch_active(&key, &active, now)?;
        }
        self.layout_dirty = true;
        Ok(id)
    }

    pub fn key(&self, series: SeriesId) -> Option<&MetricKey> {
        self.bindings.get(series.0).map(|b| &b.key)
    }

    pub fn set_visible(&mut self, series: SeriesId, visible: bool) {
        self.panes.set_visible(series, visible);
        self.layout_dirty = true;
    }

    /// Change the display bucketing; every series is rebuilt.
    pub fn set_bucketing(&mut self, engine: &Engine, bucketing: Bucketing) {
        if bucketing == self.bucketing {
            return;
        }
        self.bucketing = bucketing;
        for i in 0..self.bindings.len() {
            if let Some(merged) = self.panes.merged_mut(SeriesId(i)) {
                merged.clear();
            }
            self.refresh(engine, SeriesId(i));
        }
    }

    pub fn set_viewport_width(&mut self, px: f64) {
        self.viewport_width_px = px.max(0.0);
    }

    /// A pane's visible range changed (scroll or zoom).
    pub fn on_visible_range(&mut self, origin: PaneId, range: VisibleRange, now: Instant) {
        self.tracker.observe(range, now);
        self.panes.queue_range(origin, range);
    }

    pub fn on_crosshair(&mut self, origin: PaneId, position: Option<Position>) {
        self.panes.queue_crosshair(origin, position);
    }

    /// Zoom changed so that `visible_bars` bars are on screen.
    pub fn on_zoom(&mut self, visible_bars: usize, now: Instant) {
        self.panes.on_zoom(visible_bars, now);
    }

    /// Fold a streaming tick into `series` without refetching.
    pub fn on_stream_tick(&mut self, series: SeriesId, tick: &Tick) -> LiveOutcome {
        let scheme = self.scheme;
        let bucketing = self.bucketing;
        let Some(merged) = self.panes.merged_mut(series) else {
            return LiveOutcome::Ignored;
        };
        let outcome = apply_tick(merged, tick, scheme, bucketing);
        if let Some(point) = outcome.point() {
            self.panes.publish_point(series, point);
        }
        outcome
    }

    /// Re-merge one series from the engine's full data.
    pub fn refresh(&mut self, engine: &Engine, series: SeriesId) -> MergeOutcome {
        let Some(binding) = self.bindings.get(series.0) else {
            return MergeOutcome::Unchanged;
        };
        let Some(raw) = engine.full_data(&binding.key) else {
            return MergeOutcome::Unchanged;
        };
        let Some(merged) = self.panes.merged_mut(series) else {
            return MergeOutcome::Unchanged;
        };
        let was_empty = merged.is_empty();
        let outcome = merged.merge(&raw, self.bucketing);
        if was_empty != merged.is_empty() {
            self.layout_dirty = true;
        }
        self.panes.publish(series, &outcome);
        outcome
    }

    /// One frame: apply completions, settle the visible range, fetch, merge
    /// and push everything to the sinks.
    pub fn tick(
        &mut self,
        engine: &mut Engine,
        now: DateTime<Utc>,
        at: Instant,
    ) -> Result<TickReport, EngineError> {
        let mut report = TickReport {
            applied: engine.pump(now),
            ..TickReport::default()
        };

        if let Some(active) = self.tracker.poll(engine.scheme(self.scheme), at) {
            debug!(scheme = %self.scheme, chunks = active.len(), "active chunk set changed");
            for binding in &self.bindings {
                engine.fetch_active(&binding.key, &active, now)?;
            }
            report.active_changed = Some(active);
        }

        for i in 0..self.bindings.len() {
            let binding = &self.bindings[i];
            if binding.updates.try_iter().count() == 0 {
                continue;
            }
            // A completed chunk may unblock the next one in the active set.
            if let Some(active) = self.tracker.active().cloned() {
                let key = binding.key.clone();
                engine.fetch_active(&key, &active, now)?;
            }
            if self.refresh(engine, SeriesId(i)) != MergeOutcome::Unchanged {
                report.refreshed.push(SeriesId(i));
            }
        }

        self.panes.poll_zoom(at);
        if self.layout_dirty {
            self.panes.relayout();
            self.layout_dirty = false;
        }
        if let Some(range) = self.tracker.current() {
            self.panes.update_markers(range, self.marker_inset(range));
        }
        self.panes.flush_frame();
        Ok(report)
    }

    fn marker_inset(&self, range: VisibleRange) -> i64 {
        if self.viewport_width_px <= 0.0 {
            return 0;
        }
        let per_px = range.span() as f64 / self.viewport_width_px;
        (self.marker_inset_px * per_px).ceil() as i64
    }

    pub fn visible_range(&self) -> Option<VisibleRange> {
        self.tracker.current()
    }

    pub fn active(&self) -> Option<&ActiveChunkSet> {
        self.tracker.active()
    }

    pub fn series_points(&self, series: SeriesId) -> &[RenderPoint] {
        self.panes.merged(series).map_or(&[], |m| m.points())
    }

    pub fn markers(&self, series: SeriesId) -> &[Marker] {
        self.panes.markers(series)
    }

    pub fn representation(&self, series: SeriesId) -> Option<Representation> {
        self.panes.representation(series)
    }

    pub fn placement(&self, series: SeriesId) -> Option<PaneId> {
        self.panes.placement(series)
    }

    pub fn is_collapsed(&self, pane: PaneId) -> bool {
        self.panes.is_collapsed(pane)
    }
}
