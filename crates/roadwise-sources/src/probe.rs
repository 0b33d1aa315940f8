//! Reachability probe of the reasoning endpoint.
//!
//! A transport failure is a valid answer here ("unreachable"), so it is
//! reported as a payload rather than an error and cached like any other.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::cache::{CachedClient, RemoteSource, SourcePolicy};
use crate::{SourceError, http_client};

pub fn default_policy() -> SourcePolicy {
    SourcePolicy::new(30, 4, 60, 3)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub reachable: bool,
    /// Round trip of the probe; `None` when unreachable.
    pub latency_ms: Option<u64>,
}

impl ProbeResult {
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            latency_ms: None,
        }
    }

    /// Coarse quality label used in driver-facing text.
    pub fn quality(&self) -> &'static str {
        match self.latency_ms {
            None => "offline",
            Some(ms) if ms < 300 => "good",
            Some(ms) if ms < 1_000 => "fair",
            Some(_) => "poor",
        }
    }
}

/// Sends `HEAD` to the endpoint; any HTTP status counts as reachable.
pub struct ReachabilityProbe {
    url: String,
    client: reqwest::Client,
}

impl ReachabilityProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: http_client(Duration::from_secs(3)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteSource for ReachabilityProbe {
    type Key = ();
    type Payload = ProbeResult;

    fn name(&self) -> &str {
        "probe"
    }

    async fn fetch_remote(&self, _key: &()) -> Result<ProbeResult, SourceError> {
        let started = Instant::now();
        let result = match self.client.head(&self.url).send().await {
            Ok(_) => ProbeResult {
                reachable: true,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(e) => {
                debug!(url = %self.url, error = %e, "probe failed");
                ProbeResult::unreachable()
            }
        };
        Ok(result)
    }
}

pub type ProbeClient = CachedClient<ReachabilityProbe>;
