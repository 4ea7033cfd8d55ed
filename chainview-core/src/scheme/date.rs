//! Date scheme: one chunk per calendar year.

use super::IndexScheme;
use crate::domain::{ChunkId, Position, SchemeKind};
use chrono::{Datelike, NaiveDate, TimeDelta, Utc};
use std::ops::{Range, RangeInclusive};

// `NaiveDate::default()` is 1970-01-01.
fn epoch() -> NaiveDate {
    NaiveDate::default()
}

/// Days since 1970-01-01.
pub fn date_to_position(date: NaiveDate) -> Position {
    (date - epoch()).num_days()
}

pub fn position_to_date(pos: Position) -> Option<NaiveDate> {
    epoch().checked_add_signed(TimeDelta::try_days(pos)?)
}

fn year_start(year: i32) -> Position {
    let date = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(if year < 0 {
        NaiveDate::MIN
    } else {
        NaiveDate::MAX
    });
    date_to_position(date)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateScheme {
    start_year: i32,
    current_year: i32,
}

impl DateScheme {
    pub fn new(start_year: i32, current_year: i32) -> Self {
        Self {
            start_year,
            current_year: current_year.max(start_year),
        }
    }

    /// Valid years run from `start_year` to the current UTC year.
    pub fn until_today(start_year: i32) -> Self {
        Self::new(start_year, Utc::now().year())
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn current_year(&self) -> i32 {
        self.current_year
    }
}

impl IndexScheme for DateScheme {
    fn kind(&self) -> SchemeKind {
        SchemeKind::ByDate
    }

    fn position_to_chunk_id(&self, pos: Position) -> ChunkId {
        let year = match position_to_date(pos) {
            Some(date) => date.year(),
            None if pos < 0 => NaiveDate::MIN.year(),
            None => NaiveDate::MAX.year(),
        };
        ChunkId(year as i64)
    }

    fn chunk_id_to_range(&self, id: ChunkId) -> Range<Position> {
        let year = id.0.clamp(i32::MIN as i64, i32::MAX as i64 - 1) as i32;
        year_start(year)..year_start(year + 1)
    }

    fn bounds(&self) -> RangeInclusive<ChunkId> {
        ChunkId(self.start_year as i64)..=ChunkId(self.current_year as i64)
    }

    fn parse_key(&self, key: &str) -> Option<Position> {
        NaiveDate::parse_from_str(key, "%Y-%m-%d")
            .ok()
            .map(date_to_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn epoch_is_position_zero() {
        assert_eq!(date_to_position(d(1970, 1, 1)), 0);
        assert_eq!(date_to_position(d(1970, 1, 2)), 1);
        assert_eq!(position_to_date(0), Some(d(1970, 1, 1)));
    }

    #[test]
    fn chunk_is_calendar_year() {
        let scheme = DateScheme::new(2009, 2026);
        assert_eq!(
            scheme.position_to_chunk_id(date_to_position(d(2021, 6, 1))),
            ChunkId(2021)
        );
        assert_eq!(
            scheme.position_to_chunk_id(date_to_position(d(2021, 12, 31))),
            ChunkId(2021)
        );
        assert_eq!(
            scheme.position_to_chunk_id(date_to_position(d(2022, 1, 1))),
            ChunkId(2022)
        );
    }

    #[test]
    fn year_range_is_half_open() {
        let scheme = DateScheme::new(2009, 2026);
        let range = scheme.chunk_id_to_range(ChunkId(2024));
        assert_eq!(range.start, date_to_position(d(2024, 1, 1)));
        assert_eq!(range.end, date_to_position(d(2025, 1, 1)));
        // leap year
        assert_eq!(range.end - range.start, 366);
    }

    #[test]
    fn array_offsets_count_days_from_new_year() {
        let scheme = DateScheme::new(2009, 2026);
        assert_eq!(
            scheme.offset_position(ChunkId(2021), 31),
            date_to_position(d(2021, 2, 1))
        );
    }

    #[test]
    fn parses_iso_keys() {
        let scheme = DateScheme::new(2009, 2026);
        assert_eq!(
            scheme.parse_key("2021-06-01"),
            Some(date_to_position(d(2021, 6, 1)))
        );
        assert_eq!(scheme.parse_key("June 1st"), None);
    }

    #[test]
    fn bounds_span_start_to_current_year() {
        let scheme = DateScheme::new(2009, 2026);
        assert!(scheme.contains(ChunkId(2009)));
        assert!(scheme.contains(ChunkId(2026)));
        assert!(!scheme.contains(ChunkId(2008)));
        assert!(!scheme.contains(ChunkId(2027)));
    }

    #[test]
    fn current_year_never_precedes_start() {
        let scheme = DateScheme::new(2030, 2026);
        assert_eq!(scheme.current_year(), 2030);
    }
}
