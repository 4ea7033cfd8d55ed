//! HTTP chunk source.
//!
//! Blocking reqwest client with a bounded per-request timeout and a circuit
//! breaker per host. Runs on fetch worker threads, never on the engine's
//! owner thread.

use super::circuit_breaker::BreakerRegistry;
use super::provider::{ChunkSource, FetchError};
use std::time::Duration;
use tracing::debug;

pub struct HttpSource {
    client: reqwest::blocking::Client,
    breakers: BreakerRegistry,
}

impl HttpSource {
    pub fn new(timeout: Duration, breakers: BreakerRegistry) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chainview/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, breakers })
    }

    fn host_of(url: &str) -> String {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string())
    }
}

impl ChunkSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    fn get(&self, url: &str) -> Result<String, FetchError> {
        let host = Self::host_of(url);
        let breaker = self.breakers.for_host(&host);
        if !breaker.is_allowed() {
            return Err(FetchError::CircuitOpen { host });
        }

        debug!(url, "GET");
        let resp = match self.client.get(url).send() {
            Ok(resp) => resp,
            Err(e) => {
                breaker.record_failure();
                if e.is_timeout() {
                    return Err(FetchError::Timeout(url.to_string()));
                }
                return Err(FetchError::NetworkUnreachable(e.to_string()));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            breaker.record_failure();
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        match resp.text() {
            Ok(body) => {
                breaker.record_success();
                Ok(body)
            }
            Err(e) => {
                breaker.record_failure();
                if e.is_timeout() {
                    Err(FetchError::Timeout(url.to_string()))
                } else {
                    Err(FetchError::NetworkUnreachable(e.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_extracted_from_url() {
        assert_eq!(
            HttpSource::host_of("https://metrics.example.org/api/date-to-close?chunk=2021"),
            "metrics.example.org"
        );
        assert_eq!(HttpSource::host_of("not a url"), "not a url");
    }

    #[test]
    fn open_breaker_short_circuits() {
        let breakers = BreakerRegistry::new(1, Duration::from_secs(60));
        breakers.for_host("unreachable.invalid").record_failure();
        let source = HttpSource::new(Duration::from_secs(1), breakers).unwrap();

        let err = source
            .get("http://unreachable.invalid/date-to-close?chunk=2021")
            .unwrap_err();
        assert!(matches!(err, FetchError::CircuitOpen { .. }));
    }
}
