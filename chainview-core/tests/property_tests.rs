//! Property tests for chunking and merge invariants.
//!
//! Uses proptest to verify:
//! 1. Chunk coverage: the active chunks cover every visible position
//! 2. Chunk partition: chunk ranges are contiguous and never overlap
//! 3. Merge monotonicity: a superset refresh keeps the prefix and strictly
//!    increasing positions, and matches a from-scratch build

use chainview_core::domain::{ChunkId, Position, RawSeries, ValueColumn};
use chainview_core::scheme::{DateScheme, HeightScheme, IndexScheme};
use chainview_core::view::{
    active_chunks, merge_all, Bucketing, MergeOutcome, MergedSeries, VisibleRange,
};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_bucket() -> impl Strategy<Value = i64> {
    prop_oneof![Just(10_000_i64), 1..5_000_i64]
}

fn arb_bucketing() -> impl Strategy<Value = Bucketing> {
    prop_oneof![
        Just(Bucketing::Identity),
        Just(Bucketing::Week),
        Just(Bucketing::Month),
        (2..50_i64).prop_map(Bucketing::Fixed),
    ]
}

/// Strictly increasing positions with matching scalar values.
fn arb_raw(max_len: usize) -> impl Strategy<Value = Vec<(Position, f64)>> {
    prop::collection::vec((1..5_i64, -1_000.0..1_000.0_f64), 1..max_len).prop_map(|steps| {
        let mut pos = 15_000;
        steps
            .into_iter()
            .map(|(step, value)| {
                pos += step;
                (pos, value)
            })
            .collect()
    })
}

fn raw(entries: &[(Position, f64)]) -> RawSeries {
    RawSeries::new(
        entries.iter().map(|(p, _)| *p).collect(),
        ValueColumn::Scalar(entries.iter().map(|(_, v)| *v).collect()),
    )
}

// ── 1. Chunk coverage ────────────────────────────────────────────────

proptest! {
    #[test]
    fn height_chunks_cover_visible_range(
        bucket in arb_bucket(),
        from in 0..2_000_000_i64,
        span in 0..200_000_i64,
    ) {
        let scheme = HeightScheme::new(bucket);
        let range = VisibleRange::new(from, from + span);
        let set = active_chunks(&scheme, &range, 0);

        prop_assert!(!set.is_empty());
        let first = scheme.chunk_id_to_range(set.first().unwrap());
        let last = scheme.chunk_id_to_range(set.last().unwrap());
        prop_assert!(first.start <= range.from);
        prop_assert!(last.end > range.to);
        for pair in set.ids().windows(2) {
            prop_assert_eq!(
                scheme.chunk_id_to_range(pair[0]).end,
                scheme.chunk_id_to_range(pair[1]).start
            );
        }
    }

    #[test]
    fn date_chunks_cover_visible_range(from in 14_245..20_000_i64, span in 0..2_000_i64) {
        // 14_245 is 2009-01-01.
        let scheme = DateScheme::new(2009, 2030);
        let range = VisibleRange::new(from, from + span);
        let set = active_chunks(&scheme, &range, 0);

        for pos in [range.from, range.to, range.from + span / 2] {
            let id = scheme.position_to_chunk_id(pos);
            prop_assert!(set.ids().contains(&id));
            prop_assert!(scheme.chunk_id_to_range(id).contains(&pos));
        }
    }

    // ── 2. Chunk partition ───────────────────────────────────────────

    #[test]
    fn position_maps_into_its_own_chunk(bucket in arb_bucket(), pos in 0..10_000_000_i64) {
        let scheme = HeightScheme::new(bucket);
        let id = scheme.position_to_chunk_id(pos);
        prop_assert!(scheme.chunk_id_to_range(id).contains(&pos));
        prop_assert!(scheme.position_to_chunk_id(pos + 1) >= id);
        prop_assert_eq!(scheme.next_chunk_id(id), ChunkId(id.0 + bucket));
    }

    // ── 3. Merge monotonicity ────────────────────────────────────────

    #[test]
    fn superset_refresh_keeps_prefix(
        entries in arb_raw(200),
        cut in 0.0..1.0_f64,
        bucketing in arb_bucketing(),
    ) {
        let split = ((entries.len() as f64 * cut) as usize).max(1);
        let mut merged = MergedSeries::new();
        merged.merge(&raw(&entries[..split]), bucketing);
        let before = merged.points().to_vec();

        let outcome = merged.merge(&raw(&entries), bucketing);
        let after = merged.points();

        // Everything but the old tail point is untouched.
        prop_assert_eq!(&after[..before.len() - 1], &before[..before.len() - 1]);
        prop_assert!(after.windows(2).all(|w| w[0].position < w[1].position));
        let expected = merge_all(&raw(&entries), bucketing);
        prop_assert_eq!(after, expected.as_slice());

        match outcome {
            MergeOutcome::Updated(points) => {
                prop_assert!(points[0].position >= before.last().unwrap().position);
            }
            MergeOutcome::Unchanged => prop_assert_eq!(after.len(), before.len()),
            MergeOutcome::Replaced => prop_assert!(false, "superset refresh must not replace"),
        }
    }
}
