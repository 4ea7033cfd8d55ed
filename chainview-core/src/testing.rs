//! Test doubles shared by unit and integration tests.
//!
//! [`ScriptedFetcher`] records every dispatched job and lets the test decide
//! when, in what order, and with what result each one completes.

use crate::data::{FetchCompletion, FetchError, FetchJob, Fetcher};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

struct Pending {
    job: FetchJob,
    reply: Sender<FetchCompletion>,
    answered: bool,
}

#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    jobs: Arc<Mutex<Vec<Pending>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Pending>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs dispatched so far, answered or not.
    pub fn dispatched(&self) -> usize {
        self.lock().len()
    }

    /// Jobs still waiting for an answer.
    pub fn pending(&self) -> usize {
        self.lock().iter().filter(|p| !p.answered).count()
    }

    /// The `index`-th dispatched job. Panics when out of range.
    pub fn job(&self, index: usize) -> FetchJob {
        self.lock()[index].job.clone()
    }

    pub fn jobs(&self) -> Vec<FetchJob> {
        self.lock().iter().map(|p| p.job.clone()).collect()
    }

    /// Answer the `index`-th job. Answering twice is a no-op.
    pub fn respond(&self, index: usize, result: Result<String, FetchError>) {
        let mut jobs = self.lock();
        let pending = &mut jobs[index];
        if !pending.answered {
            pending.answered = true;
            let _ = pending
                .reply
                .send(FetchCompletion::for_job(&pending.job, result));
        }
    }

    /// Answer the `index`-th job a second time, as a duplicate delivery would.
    pub fn redeliver(&self, index: usize, result: Result<String, FetchError>) {
        let jobs = self.lock();
        let pending = &jobs[index];
        let _ = pending
            .reply
            .send(FetchCompletion::for_job(&pending.job, result));
    }

    /// Answer every pending job, oldest first.
    pub fn respond_all(&self, mut answer: impl FnMut(&FetchJob) -> Result<String, FetchError>) {
        let mut jobs = self.lock();
        for pending in jobs.iter_mut().filter(|p| !p.answered) {
            pending.answered = true;
            let completion = FetchCompletion::for_job(&pending.job, answer(&pending.job));
            let _ = pending.reply.send(completion);
        }
    }
}

impl Fetcher for ScriptedFetcher {
    fn dispatch(&self, job: FetchJob, reply: Sender<FetchCompletion>) {
        self.lock().push(Pending {
            job,
            reply,
            answered: false,
        });
    }
}

/// Array-form scalar body for `chunk`.
pub fn scalar_body(chunk: i64, values: &[f64]) -> String {
    let map = serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string());
    format!(r#"{{"dataset":{{"map":{map}}},"chunk":{{"id":{chunk}}}}}"#)
}

/// Object-form body keyed by arbitrary strings (dates, heights).
pub fn keyed_body(chunk: i64, entries: &[(&str, serde_json::Value)]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    let body = serde_json::json!({ "dataset": { "map": map }, "chunk": { "id": chunk } });
    body.to_string()
}

/// Array-form OHLC body; each entry is `[open, high, low, close]`.
pub fn ohlc_body(chunk: i64, bars: &[[f64; 4]]) -> String {
    let map = serde_json::to_string(bars).unwrap_or_else(|_| "[]".to_string());
    format!(r#"{{"dataset":{{"map":{map}}},"chunk":{{"id":{chunk}}}}}"#)
}
