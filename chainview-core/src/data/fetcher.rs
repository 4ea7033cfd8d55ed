//! Fetch dispatch: network requests run off the engine's owner thread.
//!
//! The engine hands a [`FetchJob`] to a [`Fetcher`] together with the reply
//! side of its completion channel. Completions come back as
//! [`FetchCompletion`] messages and are applied by the owner in arrival order.

use super::payload::ChunkPayload;
use super::provider::{ChunkSource, FetchError};
use crate::domain::{ChunkId, MetricKey};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// One network request for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub key: MetricKey,
    pub chunk: ChunkId,
    /// Per-slot monotonic request id.
    pub seq: u64,
    /// Primary URL; also the local cache key.
    pub url: String,
    pub backup_url: Option<String>,
}

/// Result of a [`FetchJob`], sent back to the engine.
#[derive(Debug)]
pub struct FetchCompletion {
    pub key: MetricKey,
    pub chunk: ChunkId,
    pub seq: u64,
    pub url: String,
    /// Raw response body on success.
    pub result: Result<String, FetchError>,
}

impl FetchCompletion {
    pub fn for_job(job: &FetchJob, result: Result<String, FetchError>) -> Self {
        Self {
            key: job.key.clone(),
            chunk: job.chunk,
            seq: job.seq,
            url: job.url.clone(),
            result,
        }
    }
}

/// Something that can run fetch jobs and report back.
pub trait Fetcher: Send {
    fn dispatch(&self, job: FetchJob, reply: Sender<FetchCompletion>);
}

/// Primary first, then exactly one attempt against the backup. A primary
/// body that fails the envelope check counts as a failed primary.
pub fn fetch_with_fallback(
    source: &dyn ChunkSource,
    job: &FetchJob,
) -> Result<String, FetchError> {
    let primary_err = match fetch_checked(source, &job.url, job.chunk) {
        Ok(body) => return Ok(body),
        Err(e) => e,
    };
    match job.backup_url.as_deref() {
        Some(backup) => {
            debug!(url = %job.url, error = %primary_err, "primary failed, trying backup");
            fetch_checked(source, backup, job.chunk)
        }
        None => Err(primary_err),
    }
}

fn fetch_checked(
    source: &dyn ChunkSource,
    url: &str,
    chunk: ChunkId,
) -> Result<String, FetchError> {
    let body = source.get(url)?;
    ChunkPayload::check_envelope(&body, chunk)?;
    Ok(body)
}

type Work = (FetchJob, Sender<FetchCompletion>);

/// Fixed pool of worker threads sharing one job queue.
pub struct ThreadFetcher {
    jobs: Sender<Work>,
    _workers: Vec<JoinHandle<()>>,
}

impl ThreadFetcher {
    pub fn new(source: Arc<dyn ChunkSource>, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Work>();
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .filter_map(|i| {
                let rx = rx.clone();
                let source = source.clone();
                thread::Builder::new()
                    .name(format!("chainview-fetch-{i}"))
                    .spawn(move || worker_loop(&*source, &rx))
                    .map_err(|e| warn!(worker = i, error = %e, "failed to spawn fetch worker"))
                    .ok()
            })
            .collect();

        Self {
            jobs: tx,
            _workers: handles,
        }
    }
}

fn worker_loop(source: &dyn ChunkSource, rx: &Mutex<Receiver<Work>>) {
    loop {
        let next = rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
        let Ok((job, reply)) = next else {
            break;
        };
        let result = fetch_with_fallback(source, &job);
        // Receiver gone means the engine was dropped; nothing left to notify.
        let _ = reply.send(FetchCompletion::for_job(&job, result));
    }
}

impl Fetcher for ThreadFetcher {
    fn dispatch(&self, job: FetchJob, reply: Sender<FetchCompletion>) {
        if let Err(mpsc::SendError((job, reply))) = self.jobs.send((job, reply)) {
            let _ = reply.send(FetchCompletion::for_job(
                &job,
                Err(FetchError::Other("fetch workers stopped".into())),
            ));
        }
    }
}
