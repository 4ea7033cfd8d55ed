//! Height scheme: one chunk per fixed-size block-height bucket.

use super::IndexScheme;
use crate::domain::{ChunkId, Position, SchemeKind};
use std::ops::{Range, RangeInclusive};

pub const DEFAULT_BUCKET: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightScheme {
    bucket: i64,
    tip: Option<Position>,
}

impl HeightScheme {
    /// A zero or negative bucket falls back to [`DEFAULT_BUCKET`].
    pub fn new(bucket: i64) -> Self {
        Self {
            bucket: if bucket > 0 { bucket } else { DEFAULT_BUCKET },
            tip: None,
        }
    }

    /// Cap valid ids at the chunk holding the current chain tip.
    pub fn with_tip(mut self, tip: Position) -> Self {
        self.tip = Some(tip.max(0));
        self
    }

    pub fn bucket(&self) -> i64 {
        self.bucket
    }
}

impl IndexScheme for HeightScheme {
    fn kind(&self) -> SchemeKind {
        SchemeKind::ByHeight
    }

    fn position_to_chunk_id(&self, pos: Position) -> ChunkId {
        ChunkId(pos.div_euclid(self.bucket) * self.bucket)
    }

    fn chunk_id_to_range(&self, id: ChunkId) -> Range<Position> {
        id.0..id.0.saturating_add(self.bucket)
    }

    fn bounds(&self) -> RangeInclusive<ChunkId> {
        let last = match self.tip {
            Some(tip) => self.position_to_chunk_id(tip),
            None => self.position_to_chunk_id(Position::MAX - self.bucket),
        };
        ChunkId(0)..=last
    }

    fn parse_key(&self, key: &str) -> Option<Position> {
        key.trim().parse().ok()
    }

    /// The next bucket only exists once the previous one is full.
    fn may_fetch(&self, previous_rows: Option<usize>) -> bool {
        match previous_rows {
            None => true,
            Some(rows) => rows as i64 >= self.bucket,
        }
    }
}
