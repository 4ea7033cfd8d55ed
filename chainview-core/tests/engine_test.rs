//! Integration tests for the fetch engine.
//!
//! Tests:
//! 1. Idempotent freshness: two fetches inside the window issue one request
//! 2. Dedup: triggers on an unresolved slot never stack requests
//! 3. No-op detection: an unchanged refetch does not bump the revision
//! 4. Failure and empty responses leave state untouched and allow retry
//! 5. Out-of-order completions are discarded
//! 6. Backup fallback through the threaded fetcher
//! 7. Local cache: responses are persisted and painted on the next run

use chainview_core::config::EngineConfig;
use chainview_core::data::{
    ChunkSource, Endpoints, FetchError, FileStore, LocalCache, MemoryStore, ThreadFetcher,
};
use chainview_core::domain::{ChunkId, MetricKey, SchemeKind};
use chainview_core::engine::{Engine, FetchDecision, SkipReason, SlotState};
use chainview_core::testing::{keyed_body, scalar_body, ScriptedFetcher};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Helpers ──────────────────────────────────────────────────────────

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn scripted() -> (Engine, ScriptedFetcher) {
    let fetcher = ScriptedFetcher::new();
    let engine = Engine::new(
        EngineConfig::default(),
        Box::new(fetcher.clone()),
        LocalCache::inline(Arc::new(MemoryStore::new())),
    );
    (engine, fetcher)
}

fn height(metric: &str) -> MetricKey {
    MetricKey::new(metric, SchemeKind::ByHeight)
}

fn date(metric: &str) -> MetricKey {
    MetricKey::new(metric, SchemeKind::ByDate)
}

/// Serves canned bodies by URL and logs every request.
struct MapSource {
    bodies: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl MapSource {
    fn new(bodies: Vec<(String, String)>) -> Self {
        Self {
            bodies: bodies.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ChunkSource for MapSource {
    fn name(&self) -> &str {
        "map"
    }

    fn get(&self, url: &str) -> Result<String, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NetworkUnreachable(url.to_string()))
    }
}

// ── 1. Idempotent freshness ──────────────────────────────────────────

#[test]
fn second_fetch_inside_window_is_skipped() {
    let (mut engine, fetcher) = scripted();
    let key = height("close");

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    fetcher.respond(0, Ok(scalar_body(0, &[1.0, 2.0])));
    engine.pump(t0());

    let again = engine.fetch(&key, ChunkId(0), t0() + TimeDelta::seconds(30)).unwrap();
    assert_eq!(again, FetchDecision::Skipped(SkipReason::Fresh));
    assert_eq!(fetcher.dispatched(), 1);
}

// ── 2. Dedup ─────────────────────────────────────────────────────────

#[test]
fn triggers_while_loading_do_not_stack() {
    let (mut engine, fetcher) = scripted();
    let key = height("close");

    for _ in 0..5 {
        engine.fetch(&key, ChunkId(0), t0()).unwrap();
    }
    assert_eq!(fetcher.dispatched(), 1);
    assert_eq!(engine.in_flight(), 1);
    assert_eq!(
        engine.series(&key).unwrap().slot(ChunkId(0)).unwrap().state(),
        SlotState::Loading
    );
}

// ── 3. No-op detection ───────────────────────────────────────────────

#[test]
fn unchanged_refetch_does_not_notify() {
    let (mut engine, fetcher) = scripted();
    let key = height("close");
    let rx = engine.subscribe(&key);

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    fetcher.respond(0, Ok(scalar_body(0, &[1.0, 2.0])));
    engine.pump(t0());
    assert_eq!(rx.try_iter().count(), 1);
    let revision = engine.series(&key).unwrap().revision();

    let later = t0() + TimeDelta::seconds(90);
    engine.fetch(&key, ChunkId(0), later).unwrap();
    fetcher.respond(1, Ok(scalar_body(0, &[1.0, 2.0])));
    engine.pump(later);

    assert_eq!(rx.try_iter().count(), 0);
    assert_eq!(engine.series(&key).unwrap().revision(), revision);
    // The confirmed no-op still counts as a fetch.
    let slot = engine.series(&key).unwrap().slot(ChunkId(0)).unwrap();
    assert_eq!(slot.last_fetched_at(), Some(later));
}

#[test]
fn grown_chunk_replaces_and_notifies() {
    let (mut engine, fetcher) = scripted();
    let key = height("close");
    let rx = engine.subscribe(&key);

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    fetcher.respond(0, Ok(scalar_body(0, &[1.0, 2.0])));
    engine.pump(t0());

    let later = t0() + TimeDelta::seconds(90);
    engine.fetch(&key, ChunkId(0), later).unwrap();
    fetcher.respond(1, Ok(scalar_body(0, &[1.0, 2.0, 3.0])));
    engine.pump(later);

    assert_eq!(rx.try_iter().map(|r| r.revision).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(engine.full_data(&key).unwrap().positions, vec![0, 1, 2]);
}

// ── 4. Failure and empty responses ───────────────────────────────────

#[test]
fn total_failure_keeps_payload_and_retries_next_trigger() {
    let (mut engine, fetcher) = scripted();
    let key = height("close");

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    fetcher.respond(0, Ok(scalar_body(0, &[1.0])));
    engine.pump(t0());

    let later = t0() + TimeDelta::seconds(90);
    engine.fetch(&key, ChunkId(0), later).unwrap();
    fetcher.respond(1, Err(FetchError::Timeout("primary".into())));
    engine.pump(later);

    let slot = engine.series(&key).unwrap().slot(ChunkId(0)).unwrap();
    assert_eq!(slot.state(), SlotState::Ready);
    assert_eq!(slot.last_fetched_at(), Some(t0()));
    assert_eq!(engine.full_data(&key).unwrap().len(), 1);

    let retry = engine.fetch(&key, ChunkId(0), later).unwrap();
    assert!(matches!(retry, FetchDecision::Dispatched { .. }));
}

#[test]
fn malformed_body_is_a_failure() {
    let (mut engine, fetcher) = scripted();
    let key = height("close");

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    fetcher.respond(0, Ok("<html>502</html>".into()));
    engine.pump(t0());

    let slot = engine.series(&key).unwrap().slot(ChunkId(0)).unwrap();
    assert_eq!(slot.state(), SlotState::Empty);
    assert_eq!(slot.last_fetched_at(), None);
}

#[test]
fn empty_response_leaves_slot_untouched() {
    let (mut engine, fetcher) = scripted();
    let key = height("close");
    let rx = engine.subscribe(&key);

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    fetcher.respond(0, Ok(scalar_body(0, &[])));
    engine.pump(t0());

    let slot = engine.series(&key).unwrap().slot(ChunkId(0)).unwrap();
    assert!(!slot.is_loading());
    assert!(slot.payload().is_none());
    assert_eq!(slot.last_fetched_at(), None);
    assert_eq!(rx.try_iter().count(), 0);
}

// ── 5. Out-of-order completions ──────────────────────────────────────

#[test]
fn late_duplicate_of_an_older_request_is_discarded() {
    let (mut engine, fetcher) = scripted();
    let key = height("close");

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    fetcher.respond(0, Ok(scalar_body(0, &[1.0])));
    engine.pump(t0());

    let later = t0() + TimeDelta::seconds(90);
    engine.fetch(&key, ChunkId(0), later).unwrap();
    fetcher.respond(1, Ok(scalar_body(0, &[1.0, 2.0, 3.0])));
    engine.pump(later);

    fetcher.redeliver(0, Ok(scalar_body(0, &[9.0])));
    let completion_applied = engine.pump(later);
    assert_eq!(completion_applied, 1);
    assert_eq!(engine.full_data(&key).unwrap().len(), 3);
}

#[test]
fn chunk_mismatch_in_response_is_rejected() {
    let (mut engine, fetcher) = scripted();
    let key = date("price");

    engine.fetch(&key, ChunkId(2021), t0()).unwrap();
    fetcher.respond(0, Ok(keyed_body(2020, &[("2020-05-01", json!(1.0))])));
    engine.pump(t0());
    assert!(engine.full_data(&key).unwrap().is_empty());
}

#[test]
fn object_payload_keys_become_positions() {
    let (mut engine, fetcher) = scripted();
    let key = date("price");

    engine.fetch(&key, ChunkId(2021), t0()).unwrap();
    fetcher.respond(
        0,
        Ok(keyed_body(
            2021,
            &[
                ("2021-01-02", json!([1.0, 2.0, 0.5, 1.5])),
                ("2021-01-01", json!({"open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0})),
                ("2021-01-03", json!(null)),
            ],
        )),
    );
    engine.pump(t0());

    let full = engine.full_data(&key).unwrap();
    assert_eq!(full.positions, vec![18_628, 18_629, 18_630]);
}

// ── 6. Backup fallback ───────────────────────────────────────────────

#[test]
fn dead_primary_falls_back_to_backup() {
    let key = height("close");
    let config = EngineConfig {
        base_url: "http://primary.invalid/api".into(),
        backup_url: Some("http://backup.invalid/api".into()),
        ..EngineConfig::default()
    };
    let backup_url = Endpoints::chunk_url("http://backup.invalid/api", &key, ChunkId(0));
    let source = Arc::new(MapSource::new(vec![(backup_url.clone(), scalar_body(0, &[4.0]))]));
    let fetcher = ThreadFetcher::new(source.clone(), 2);
    let mut engine = Engine::new(
        config,
        Box::new(fetcher),
        LocalCache::inline(Arc::new(MemoryStore::new())),
    );

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    engine.wait_idle(Duration::from_secs(5));

    assert_eq!(engine.full_data(&key).unwrap().len(), 1);
    let calls = source.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], backup_url);
}

#[test]
fn garbage_from_primary_falls_back_to_backup() {
    let key = height("close");
    let config = EngineConfig {
        base_url: "http://p/api".into(),
        backup_url: Some("http://b/api".into()),
        ..EngineConfig::default()
    };
    let primary_url = Endpoints::chunk_url("http://p/api", &key, ChunkId(0));
    let backup_url = Endpoints::chunk_url("http://b/api", &key, ChunkId(0));
    let source = Arc::new(MapSource::new(vec![
        (primary_url.clone(), "<html>maintenance</html>".to_string()),
        (backup_url.clone(), scalar_body(0, &[4.0])),
    ]));
    let mut engine = Engine::new(
        config,
        Box::new(ThreadFetcher::new(source.clone(), 1)),
        LocalCache::inline(Arc::new(MemoryStore::new())),
    );

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    engine.wait_idle(Duration::from_secs(5));

    assert_eq!(*source.calls.lock().unwrap(), vec![primary_url, backup_url]);
    assert_eq!(engine.full_data(&key).unwrap().len(), 1);
}

#[test]
fn both_sources_down_is_not_an_error() {
    let key = height("close");
    let config = EngineConfig {
        backup_url: Some("http://backup.invalid/api".into()),
        ..EngineConfig::default()
    };
    let source = Arc::new(MapSource::new(Vec::new()));
    let mut engine = Engine::new(
        config,
        Box::new(ThreadFetcher::new(source, 1)),
        LocalCache::inline(Arc::new(MemoryStore::new())),
    );

    assert!(engine.fetch(&key, ChunkId(0), t0()).is_ok());
    assert_eq!(engine.wait_idle(Duration::from_secs(5)), 1);
    assert_eq!(engine.in_flight(), 0);
    let slot = engine.series(&key).unwrap().slot(ChunkId(0)).unwrap();
    assert_eq!(slot.state(), SlotState::Empty);
}

// ── 7. Local persistent cache ────────────────────────────────────────

#[test]
fn persisted_response_paints_the_next_session() {
    let dir = tempfile::tempdir().unwrap();
    let key = height("close");

    {
        let fetcher = ScriptedFetcher::new();
        let mut engine = Engine::new(
            EngineConfig::default(),
            Box::new(fetcher.clone()),
            LocalCache::inline(Arc::new(FileStore::new(dir.path()))),
        );
        engine.fetch(&key, ChunkId(0), t0()).unwrap();
        fetcher.respond(0, Ok(scalar_body(0, &[1.0, 2.0, 3.0])));
        assert_eq!(engine.pump(t0()), 1);
    }
    assert_eq!(FileStore::new(dir.path()).status().unwrap().entries, 1);

    let fetcher = ScriptedFetcher::new();
    let mut engine = Engine::new(
        EngineConfig::default(),
        Box::new(fetcher.clone()),
        LocalCache::inline(Arc::new(FileStore::new(dir.path()))),
    );
    let rx = engine.subscribe(&key);
    engine.fetch(&key, ChunkId(0), t0()).unwrap();

    // Painted before the network answered.
    assert_eq!(rx.try_iter().count(), 1);
    assert_eq!(engine.full_data(&key).unwrap().len(), 3);
    assert_eq!(fetcher.pending(), 1);

    // The network confirms the same tail: freshness advances, no repaint.
    fetcher.respond(0, Ok(scalar_body(0, &[1.0, 2.0, 3.0])));
    engine.pump(t0());
    assert_eq!(rx.try_iter().count(), 0);
    let slot = engine.series(&key).unwrap().slot(ChunkId(0)).unwrap();
    assert_eq!(slot.last_fetched_at(), Some(t0()));
}

#[test]
fn background_writer_persists_off_thread() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    let key = height("close");
    let fetcher = ScriptedFetcher::new();
    let mut engine = Engine::new(
        EngineConfig::default(),
        Box::new(fetcher.clone()),
        LocalCache::background(store.clone()),
    );

    engine.fetch(&key, ChunkId(0), t0()).unwrap();
    fetcher.respond(0, Ok(scalar_body(0, &[1.0])));
    engine.pump(t0());

    let mut entries = 0;
    for _ in 0..100 {
        entries = store.status().unwrap().entries;
        if entries == 1 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(entries, 1);
}

#[test]
fn dropping_the_engine_flushes_pending_writes() {
    let dir = tempfile::tempdir().unwrap();
    let key = height("close");
    let fetcher = ScriptedFetcher::new();
    let mut engine = Engine::new(
        EngineConfig::default(),
        Box::new(fetcher.clone()),
        LocalCache::background(Arc::new(FileStore::new(dir.path()))),
    );

    for chunk in [0, 10_000, 20_000] {
        engine.fetch(&key, ChunkId(chunk), t0()).unwrap();
    }
    fetcher.respond_all(|job| Ok(scalar_body(job.chunk.0, &[1.0])));
    assert_eq!(engine.pump(t0()), 3);
    drop(engine);

    assert_eq!(FileStore::new(dir.path()).status().unwrap().entries, 3);
}

#[test]
fn failed_requests_are_not_persisted() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = ScriptedFetcher::new();
    let mut engine = Engine::new(
        EngineConfig::default(),
        Box::new(fetcher.clone()),
        LocalCache::inline(store.clone()),
    );

    engine.fetch(&height("close"), ChunkId(0), t0()).unwrap();
    fetcher.respond(
        0,
        Err(FetchError::Status {
            status: 500,
            url: "x".into(),
        }),
    );
    engine.pump(t0());
    assert!(store.is_empty());
}
