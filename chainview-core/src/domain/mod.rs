//! Domain types: ids, keys, raw columns and render points.

pub mod ids;
pub mod point;

pub use ids::{ChunkId, MetricKey, Position, SchemeKind};
pub use point::{
    same_f64, Ohlc, PointValue, RawSeries, RenderPoint, ValueColumn, ValueShape,
};
