//! Per-host circuit breaker.
//!
//! After `threshold` consecutive failures against a host, requests to it are
//! refused until `cooldown` has passed, so a dead primary goes straight to
//! the backup instead of burning a timeout on every chunk.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct HostHealth {
    failures: u32,
    opened_at: Option<Instant>,
}

/// Breaker guarding one host. Shared between fetch workers.
#[derive(Debug)]
pub struct CircuitBreaker {
    health: Mutex<HostHealth>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            health: Mutex::new(HostHealth::default()),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn health(&self) -> MutexGuard<'_, HostHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a request may go out now. An expired cooldown closes the breaker.
    pub fn is_allowed(&self) -> bool {
        let mut health = self.health();
        match health.opened_at {
            Some(at) if at.elapsed() < self.cooldown => false,
            Some(_) => {
                *health = HostHealth::default();
                true
            }
            None => true,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.is_allowed()
    }

    pub fn record_success(&self) {
        *self.health() = HostHealth::default();
    }

    pub fn record_failure(&self) {
        let mut health = self.health();
        health.failures += 1;
        if health.failures >= self.threshold && health.opened_at.is_none() {
            health.opened_at = Some(Instant::now());
        }
    }
}

/// One breaker per host, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    hosts: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    threshold: u32,
    cooldown: Duration,
}

impl BreakerRegistry {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            threshold,
            cooldown,
        }
    }

    pub fn for_host(&self, host: &str) -> Arc<CircuitBreaker> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.threshold, self.cooldown))),
        )
    }
}
