//! Asset fetch abstraction for Traverse viewers.

use crate::error::EnvError;
use crate::types::AssetPayload;
use async_trait::async_trait;
use std::time::Duration;

/// Abstraction over the network/asset collaborator.
///
/// # Implementations
///
/// - **Production**: `FileFetcher` reads from a local asset root
/// - **Simulation**: in-memory map with configurable latency and failures
///
/// # Failure
///
/// A fetch may reject at any time. Callers inside the preload pipeline always
/// catch the error per asset; it never propagates past the stage that issued it.
#[async_trait]
pub trait AssetFetcher: Send + Sync + 'static {
    /// Fetches the asset at `url`.
    ///
    /// # Returns
    /// * `Ok(payload)` - Raw bytes, or parsed JSON for JSON-typed assets
    /// * `Err(EnvError::FetchFailed)` / `Err(EnvError::NotFound)` - the asset is unavailable
    async fn fetch_asset(&self, url: &str) -> Result<AssetPayload, EnvError>;
}

/// Marker trait for fetch controllers in simulation.
///
/// Allows injecting faults like failing or slow assets.
pub trait FetchController: Send + Sync {
    /// Makes every fetch of `url` reject.
    fn fail_url(&self, url: &str);

    /// Sets artificial latency for `url`.
    fn set_latency(&self, url: &str, latency: Duration);

    /// Clears all injected faults.
    fn heal_all(&self);
}
