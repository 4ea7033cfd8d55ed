//! Everything between the engine's raw series and the rendering sinks.

pub mod chart;
pub mod live;
pub mod merge;
pub mod pane;
pub mod persist;
pub mod range;
pub mod sink;

pub use chart::{Chart, TickReport};
pub use live::{apply_tick, LiveOutcome, Tick};
pub use merge::{merge_all, Bucketing, MergeOutcome, MergedSeries};
pub use pane::{PaneId, PaneSync};
pub use persist::RangeMemory;
pub use range::{active_chunks, ActiveChunkSet, VisibleRange, VisibleRangeTracker};
pub use sink::{Marker, MarkerKind, RecordingSink, RenderSink, Representation, SeriesId, SinkCall};
