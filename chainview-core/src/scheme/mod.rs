//! Index schemes: domain position ⇄ chunk id.
//!
//! A scheme partitions its whole domain into contiguous, non-overlapping
//! chunks. The engine never looks inside a chunk id; it only asks the scheme
//! to map positions to ids, ids to `[start, end)` ranges, and whether an id is
//! inside the valid bounds.

pub mod date;
pub mod height;

pub use date::{date_to_position, position_to_date, DateScheme};
pub use height::HeightScheme;

use crate::config::EngineConfig;
use crate::domain::{ChunkId, Position, SchemeKind};
use std::fmt;
use std::ops::{Range, RangeInclusive};

/// Mapping between positions and chunk ids for one index scheme.
pub trait IndexScheme: fmt::Debug + Send + Sync {
    fn kind(&self) -> SchemeKind;

    /// Monotonic: `a <= b` implies `chunk(a) <= chunk(b)`.
    fn position_to_chunk_id(&self, pos: Position) -> ChunkId;

    /// Half-open position range covered by a chunk.
    fn chunk_id_to_range(&self, id: ChunkId) -> Range<Position>;

    /// Valid chunk ids, inclusive on both ends.
    fn bounds(&self) -> RangeInclusive<ChunkId>;

    /// Position of the `offset`-th entry of an array-form chunk payload.
    fn offset_position(&self, id: ChunkId, offset: usize) -> Position {
        self.chunk_id_to_range(id).start + offset as Position
    }

    /// Parse an object-form payload key into a position.
    fn parse_key(&self, key: &str) -> Option<Position>;

    /// Whether a chunk may be requested given the row count held for the
    /// chunk just before it in the active set (`None` when it is the first).
    fn may_fetch(&self, _previous_rows: Option<usize>) -> bool {
        true
    }

    fn contains(&self, id: ChunkId) -> bool {
        self.bounds().contains(&id)
    }

    fn next_chunk_id(&self, id: ChunkId) -> ChunkId {
        self.position_to_chunk_id(self.chunk_id_to_range(id).end)
    }

    fn previous_chunk_id(&self, id: ChunkId) -> ChunkId {
        self.position_to_chunk_id(self.chunk_id_to_range(id).start - 1)
    }
}

/// The concrete schemes an engine serves, built once from config.
#[derive(Debug, Clone)]
pub struct Schemes {
    pub date: DateScheme,
    pub height: HeightScheme,
}

impl Schemes {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            date: DateScheme::until_today(config.date_start_year),
            height: HeightScheme::new(config.height_bucket),
        }
    }

    pub fn get(&self, kind: SchemeKind) -> &dyn IndexScheme {
        match kind {
            SchemeKind::ByDate => &self.date,
            SchemeKind::ByHeight => &self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes_dispatch_by_kind() {
        let schemes = Schemes::from_config(&EngineConfig::default());
        assert_eq!(schemes.get(SchemeKind::ByDate).kind(), SchemeKind::ByDate);
        assert_eq!(schemes.get(SchemeKind::ByHeight).kind(), SchemeKind::ByHeight);
    }

    #[test]
    fn neighbours_are_adjacent_chunks() {
        let height = HeightScheme::new(10_000);
        assert_eq!(height.next_chunk_id(ChunkId(850_000)), ChunkId(860_000));
        assert_eq!(height.previous_chunk_id(ChunkId(850_000)), ChunkId(840_000));

        let date = DateScheme::new(2009, 2030);
        assert_eq!(date.next_chunk_id(ChunkId(2021)), ChunkId(2022));
        assert_eq!(date.previous_chunk_id(ChunkId(2021)), ChunkId(2020));
    }
}
