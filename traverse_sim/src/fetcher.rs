//! In-memory asset fetcher with fault injection.

use crate::context::SimContext;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;
use traverse_env::{AssetFetcher, AssetPayload, EnvError, FetchController, TraverseContext};

/// Serves assets from memory. Latency is charged to the virtual clock.
pub struct SimFetcher {
    ctx: Arc<SimContext>,

    /// Assets by url
    assets: Mutex<HashMap<String, AssetPayload>>,

    /// Urls that always reject
    failing: Mutex<HashSet<String>>,

    /// Per-url latency
    latency: Mutex<HashMap<String, Duration>>,

    /// Total fetches attempted
    fetch_count: AtomicU64,

    /// Fetch log, in call order
    log: Mutex<Vec<String>>,
}

impl SimFetcher {
    pub fn new(ctx: Arc<SimContext>) -> Self {
        Self {
            ctx,
            assets: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            latency: Mutex::new(HashMap::new()),
            fetch_count: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Publishes an asset at `url`.
    pub fn insert(&self, url: impl Into<String>, payload: AssetPayload) {
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), payload);
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Urls fetched so far, in call order.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AssetFetcher for SimFetcher {
    async fn fetch_asset(&self, url: &str) -> Result<AssetPayload, EnvError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());

        let latency = self
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied();
        if let Some(latency) = latency {
            self.ctx.sleep(latency).await;
        }

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(url);
        if failing {
            debug!("Injected failure for {}", url);
            return Err(EnvError::fetch(url, "injected failure"));
        }

        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| EnvError::NotFound(url.to_string()))
    }
}

impl FetchController for SimFetcher {
    fn fail_url(&self, url: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string());
    }

    fn set_latency(&self, url: &str, latency: Duration) {
        self.latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), latency);
    }

    fn heal_all(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
