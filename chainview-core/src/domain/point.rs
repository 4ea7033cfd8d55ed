//! Points: raw columns as fetched, and renderer-ready points.

use super::ids::Position;
use serde::{Deserialize, Serialize};

/// Equality that treats two NaNs as the same value (a gap equals a gap).
pub fn same_f64(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Open/high/low/close quadruple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Ohlc {
    pub fn new(open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
        }
    }

    /// A missing OHLC entry; every field is NaN.
    pub fn gap() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN)
    }

    /// Fold a later entry into this one: keep the first open, widen the
    /// high/low envelope, take the last close.
    pub fn absorb(&mut self, later: &Ohlc) {
        if self.open.is_nan() {
            self.open = later.open;
        }
        self.high = nan_max(self.high, later.high);
        self.low = nan_min(self.low, later.low);
        self.close = later.close;
    }

    /// Field-by-field equality with NaN == NaN.
    pub fn same_as(&self, other: &Ohlc) -> bool {
        same_f64(self.open, other.open)
            && same_f64(self.high, other.high)
            && same_f64(self.low, other.low)
            && same_f64(self.close, other.close)
    }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else {
        a.max(b)
    }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else {
        a.min(b)
    }
}

/// Whether a metric carries plain numbers or OHLC quadruples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    Scalar,
    Ohlc,
}

/// Value of a single rendered point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Scalar(f64),
    Ohlc(Ohlc),
}

impl PointValue {
    pub fn shape(&self) -> ValueShape {
        match self {
            PointValue::Scalar(_) => ValueShape::Scalar,
            PointValue::Ohlc(_) => ValueShape::Ohlc,
        }
    }

    pub fn same_as(&self, other: &PointValue) -> bool {
        match (self, other) {
            (PointValue::Scalar(a), PointValue::Scalar(b)) => same_f64(*a, *b),
            (PointValue::Ohlc(a), PointValue::Ohlc(b)) => a.same_as(b),
            _ => false,
        }
    }

    /// Lowest value of the point (`low` for OHLC).
    pub fn low(&self) -> f64 {
        match self {
            PointValue::Scalar(v) => *v,
            PointValue::Ohlc(o) => o.low,
        }
    }

    /// Highest value of the point (`high` for OHLC).
    pub fn high(&self) -> f64 {
        match self {
            PointValue::Scalar(v) => *v,
            PointValue::Ohlc(o) => o.high,
        }
    }

    pub fn close(&self) -> f64 {
        match self {
            PointValue::Scalar(v) => *v,
            PointValue::Ohlc(o) => o.close,
        }
    }
}

/// Renderer-ready point. Only the merge engine and the live bridge build these.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderPoint {
    pub position: Position,
    pub value: PointValue,
}

impl RenderPoint {
    pub fn scalar(position: Position, value: f64) -> Self {
        Self {
            position,
            value: PointValue::Scalar(value),
        }
    }

    pub fn ohlc(position: Position, ohlc: Ohlc) -> Self {
        Self {
            position,
            value: PointValue::Ohlc(ohlc),
        }
    }

    /// Line representation of the point (OHLC collapses to its close).
    pub fn as_line(&self) -> RenderPoint {
        RenderPoint::scalar(self.position, self.value.close())
    }
}

/// Value column of a raw series, resolved once per payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueColumn {
    /// Missing entries are NaN.
    Scalar(Vec<f64>),
    Ohlc(Vec<Ohlc>),
}

impl ValueColumn {
    pub fn empty(shape: ValueShape) -> Self {
        match shape {
            ValueShape::Scalar => ValueColumn::Scalar(Vec::new()),
            ValueShape::Ohlc => ValueColumn::Ohlc(Vec::new()),
        }
    }

    pub fn shape(&self) -> ValueShape {
        match self {
            ValueColumn::Scalar(_) => ValueShape::Scalar,
            ValueColumn::Ohlc(_) => ValueShape::Ohlc,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ValueColumn::Scalar(v) => v.len(),
            ValueColumn::Ohlc(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<PointValue> {
        match self {
            ValueColumn::Scalar(v) => v.get(i).copied().map(PointValue::Scalar),
            ValueColumn::Ohlc(v) => v.get(i).copied().map(PointValue::Ohlc),
        }
    }

    /// Append another column of the same shape. Returns false on shape mismatch.
    pub fn extend_from(&mut self, other: &ValueColumn) -> bool {
        match (self, other) {
            (ValueColumn::Scalar(a), ValueColumn::Scalar(b)) => {
                a.extend_from_slice(b);
                true
            }
            (ValueColumn::Ohlc(a), ValueColumn::Ohlc(b)) => {
                a.extend_from_slice(b);
                true
            }
            _ => false,
        }
    }
}

/// Parallel `(positions, values)` columns, positions sorted ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub positions: Vec<Position>,
    pub values: ValueColumn,
}

impl RawSeries {
    pub fn new(positions: Vec<Position>, values: ValueColumn) -> Self {
        debug_assert_eq!(positions.len(), values.len());
        Self { positions, values }
    }

    pub fn empty(shape: ValueShape) -> Self {
        Self {
            positions: Vec::new(),
            values: ValueColumn::empty(shape),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn shape(&self) -> ValueShape {
        self.values.shape()
    }

    /// Last `(position, value)` entry, if any.
    pub fn last(&self) -> Option<(Position, PointValue)> {
        let i = self.positions.len().checked_sub(1)?;
        Some((self.positions[i], self.values.get(i)?))
    }
}
