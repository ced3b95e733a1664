//! Production implementations backed by Tokio.

use crate::error::EnvError;
use crate::fetch::AssetFetcher;
use crate::types::AssetPayload;
use crate::TraverseContext;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Production context backed by Tokio.
///
/// Time comes from the system clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TraverseContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

/// Asset fetcher reading from a local directory.
///
/// URLs are resolved relative to `root`. Files with a `.json`, `.czml` or
/// `.geojson` extension are parsed into `AssetPayload::Json`; everything
/// else is returned as bytes.
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    /// Creates a fetcher rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the asset root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_json(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("json" | "czml" | "geojson")
        )
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    async fn fetch_asset(&self, url: &str) -> Result<AssetPayload, EnvError> {
        let path = self.root.join(url.trim_start_matches('/'));

        let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EnvError::NotFound(url.to_string()),
            _ => EnvError::fetch(url, e),
        })?;

        if Self::is_json(&path) {
            let value = serde_json::from_slice(&data)
                .map_err(|e| EnvError::DecodeError(format!("{url}: {e}")))?;
            Ok(AssetPayload::Json(value))
        } else {
            Ok(AssetPayload::bytes(data))
        }
    }
}
