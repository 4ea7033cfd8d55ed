//! Rendering sink: the black-box chart widget behind one pane.

use super::range::VisibleRange;
use crate::domain::{Position, RenderPoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Handle of a series inside a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesId(pub usize);

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// How a price series is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    Candles,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// Below the bar, pointing up; marks the minimum.
    Up,
    /// Above the bar, pointing down; marks the maximum.
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub position: Position,
    pub kind: MarkerKind,
    pub value: f64,
}

/// Operations a chart pane accepts. Every call is a full statement of the
/// new state for that series or pane.
pub trait RenderSink {
    /// Replace every point of a series.
    fn set_data(&mut self, series: SeriesId, points: &[RenderPoint]);

    /// Update the last point in place, or append a newer one.
    fn update(&mut self, series: SeriesId, point: RenderPoint);

    /// Replace the series' markers; an empty slice clears them.
    fn set_markers(&mut self, series: SeriesId, markers: &[Marker]);

    fn set_representation(&mut self, series: SeriesId, representation: Representation);

    fn remove_series(&mut self, series: SeriesId);

    fn set_visible_range(&mut self, range: VisibleRange);

    fn set_crosshair(&mut self, position: Option<Position>);

    fn set_collapsed(&mut self, collapsed: bool);
}

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    SetData(SeriesId, Vec<RenderPoint>),
    Update(SeriesId, RenderPoint),
    SetMarkers(SeriesId, Vec<Marker>),
    SetRepresentation(SeriesId, Representation),
    RemoveSeries(SeriesId),
    SetVisibleRange(VisibleRange),
    SetCrosshair(Option<Position>),
    SetCollapsed(bool),
}

/// Sink that only records what it was told. Clones share the same log, so a
/// test can keep one handle while the chart owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: SinkCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<SinkCall> {
        std::mem::take(&mut *self.calls.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl RenderSink for RecordingSink {
    fn set_data(&mut self, series: SeriesId, points: &[RenderPoint]) {
        self.record(SinkCall::SetData(series, points.to_vec()));
    }

    fn update(&mut self, series: SeriesId, point: RenderPoint) {
        self.record(SinkCall::Update(series, point));
    }

    fn set_markers(&mut self, series: SeriesId, markers: &[Marker]) {
        self.record(SinkCall::SetMarkers(series, markers.to_vec()));
    }

    fn set_representation(&mut self, series: SeriesId, representation: Representation) {
        self.record(SinkCall::SetRepresentation(series, representation));
    }

    fn remove_series(&mut self, series: SeriesId) {
        self.record(SinkCall::RemoveSeries(series));
    }

    fn set_visible_range(&mut self, range: VisibleRange) {
        self.record(SinkCall::SetVisibleRange(range));
    }

    fn set_crosshair(&mut self, position: Option<Position>) {
        self.record(SinkCall::SetCrosshair(position));
    }

    fn set_collapsed(&mut self, collapsed: bool) {
        self.record(SinkCall::SetCollapsed(collapsed));
    }
}
