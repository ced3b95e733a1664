//! The "PRELOAD" Engine - Staged, Progress-Reporting Asset Pipeline
//!
//! Runs an ordered list of weighted stages. Each stage fans out over its
//! independent assets concurrently and settles only when all of them have
//! either loaded or failed. Stages themselves run strictly in order because
//! later stages read state established by earlier ones (terrain before
//! trajectories before landmarks).
//!
//! ```text
//! Stage N:  cache.get ─┬─ hit ─────────────────┐
//!                      └─ miss ─ fetch ─┬─ ok ─┼─ sink.apply_asset ─┬─ ok ─ cache.put
//!                        (join_all)     └─ err ─ warn, skip     └─ err ─ evict
//! progress = Σ weight(Done) ────────────────────────────────────────┘
//! ```
//!
//! Only payloads the sink accepted are cached, so a rejected document is
//! fetched again on the next run instead of being replayed from the cache.
//!
//! Per-asset failures never fail the run. A stage is `Failed` only when it
//! had assets and none of them loaded; its weight is then never credited, so
//! overall progress stalls below 100.

use crate::documents::DocumentError;
use crate::traverse_cache::SessionCache;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use traverse_env::{AssetFetcher, AssetPayload, EntityId, EnvError, TraverseContext};

/// Name of the terminal pseudo-stage.
pub const FINALIZING_STAGE: &str = "Finalizing";

const WEIGHT_EPSILON: f64 = 1e-6;

// ============================================================================
// STAGES
// ============================================================================

/// Lifecycle of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// What a stage loads, used by the sink to decide how to register payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Terrain,
    Models,
    Trajectories,
    Landmarks,
    Finalizing,
}

/// One asset to acquire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRequest {
    /// Logical name, used as the cache key
    pub key: String,

    /// Location passed to the fetcher
    pub url: String,

    /// Entity this asset belongs to (vehicle models)
    #[serde(default)]
    pub entity_id: Option<EntityId>,
}

impl AssetRequest {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            entity_id: None,
        }
    }

    pub fn for_entity(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }
}

/// One weighted, ordered phase of asset acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStage {
    pub name: String,
    pub kind: StageKind,

    /// Share of overall progress in [0, 1]
    pub weight: f64,

    pub status: StageStatus,
    pub assets: Vec<AssetRequest>,
}

impl PipelineStage {
    pub fn new(name: impl Into<String>, kind: StageKind, weight: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            weight,
            status: StageStatus::Pending,
            assets: Vec::new(),
        }
    }

    pub fn with_asset(mut self, asset: AssetRequest) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn with_assets(mut self, assets: impl IntoIterator<Item = AssetRequest>) -> Self {
        self.assets.extend(assets);
        self
    }

    fn finalizing() -> Self {
        Self::new(FINALIZING_STAGE, StageKind::Finalizing, 0.0)
    }
}

// ============================================================================
// SINK
// ============================================================================

/// Receiver of loaded payloads.
///
/// The viewer implements this to register terrain, models, tracks and
/// landmarks as each stage settles.
pub trait StageSink {
    /// Registers one loaded asset. An error marks the asset as failed; it is
    /// logged and skipped like a fetch failure.
    fn apply_asset(
        &mut self,
        kind: StageKind,
        asset: &AssetRequest,
        payload: AssetPayload,
    ) -> Result<(), AssetError>;

    /// Post-load hooks run by the `Finalizing` pseudo-stage. Cannot fail.
    fn finalize(&mut self);
}

// ============================================================================
// PROGRESS
// ============================================================================

/// Pushed after every stage transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage_name: String,
    pub status: StageStatus,

    /// Overall progress in percent (0..=100)
    pub overall_progress: u8,
}

/// Latest pipeline state, as observed by polling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSnapshot {
    pub progress: u8,
    pub current_stage: String,
    pub finished: bool,
}

/// Cloneable read handle for UI polling while the pipeline runs.
#[derive(Debug, Clone)]
pub struct PipelineMonitor {
    rx: watch::Receiver<PipelineSnapshot>,
}

impl PipelineMonitor {
    /// Overall progress in percent.
    pub fn progress(&self) -> u8 {
        self.rx.borrow().progress
    }

    /// Name of the stage currently running (or last run).
    pub fn current_stage_name(&self) -> String {
        self.rx.borrow().current_stage.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.rx.borrow().finished
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.rx.borrow().clone()
    }
}

/// Creates the channel carrying `ProgressUpdate`s.
///
/// The receiver yields every transition and ends once `run` returns.
pub fn progress_channel() -> (
    mpsc::UnboundedSender<ProgressUpdate>,
    mpsc::UnboundedReceiver<ProgressUpdate>,
) {
    mpsc::unbounded_channel()
}

/// Per-stage outcome returned by `run`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub name: String,
    pub status: StageStatus,
    pub loaded: usize,
    pub failed: usize,
    pub from_cache: usize,
    /// Assets requested from the fetcher, whether or not they were applied.
    pub fetched: usize,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub stages: Vec<StageOutcome>,
    pub progress: u8,
}

impl PipelineReport {
    pub fn fetched(&self) -> usize {
        self.stages.iter().map(|s| s.fetched).sum()
    }

    pub fn failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Ordered, weighted preload pipeline.
pub struct PreloadPipeline {
    stages: Vec<PipelineStage>,
    state_tx: watch::Sender<PipelineSnapshot>,
}

impl PreloadPipeline {
    /// Builds a pipeline from the declared stages, appending the
    /// `Finalizing` pseudo-stage.
    ///
    /// Weights must each lie in [0, 1] and sum to 1.
    pub fn new(stages: Vec<PipelineStage>) -> Result<Self, PipelineError> {
        for stage in &stages {
            if stage.kind == StageKind::Finalizing {
                return Err(PipelineError::ReservedStage(stage.name.clone()));
            }
            if !(0.0..=1.0).contains(&stage.weight) {
                return Err(PipelineError::WeightOutOfRange {
                    stage: stage.name.clone(),
                    weight: stage.weight,
                });
            }
        }

        let sum: f64 = stages.iter().map(|s| s.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(PipelineError::InvalidWeights { sum });
        }

        let mut stages = stages;
        stages.push(PipelineStage::finalizing());

        let (state_tx, _) = watch::channel(PipelineSnapshot::default());
        Ok(Self { stages, state_tx })
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// Returns a polling handle.
    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor {
            rx: self.state_tx.subscribe(),
        }
    }

    /// Sum of Done weights in percent. A running stage earns no partial
    /// credit.
    pub fn progress(&self) -> u8 {
        let done: f64 = self
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Done)
            .map(|s| s.weight)
            .sum();
        (done * 100.0).round().clamp(0.0, 100.0) as u8
    }

    /// Name of the running stage, or of the last stage that ran.
    pub fn current_stage_name(&self) -> &str {
        self.stages
            .iter()
            .rev()
            .find(|s| s.status != StageStatus::Pending)
            .map_or("", |s| s.name.as_str())
    }

    /// Runs every stage in order.
    ///
    /// Each transition is pushed on `updates` (dropped on return, which ends
    /// the receiver's stream) and published to monitors. Returns once every
    /// stage is `Done` or `Failed`.
    pub async fn run<C, F, K>(
        &mut self,
        ctx: &C,
        fetcher: &F,
        cache: &mut SessionCache,
        sink: &mut K,
        updates: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> PipelineReport
    where
        C: TraverseContext,
        F: AssetFetcher,
        K: StageSink,
    {
        for stage in &mut self.stages {
            stage.status = StageStatus::Pending;
        }
        self.publish(false);

        let mut outcomes = Vec::with_capacity(self.stages.len());

        for index in 0..self.stages.len() {
            self.stages[index].status = StageStatus::Running;
            info!("Stage started: {}", self.stages[index].name);
            self.emit(index, &updates);

            let outcome = if self.stages[index].kind == StageKind::Finalizing {
                sink.finalize();
                StageOutcome {
                    name: self.stages[index].name.clone(),
                    status: StageStatus::Done,
                    loaded: 0,
                    failed: 0,
                    from_cache: 0,
                    fetched: 0,
                }
            } else {
                run_stage(&self.stages[index], ctx, fetcher, cache, sink).await
            };

            self.stages[index].status = outcome.status;
            match outcome.status {
                StageStatus::Failed => warn!(
                    "Stage failed: {} ({} assets failed)",
                    outcome.name, outcome.failed
                ),
                _ => info!(
                    "Stage done: {} (loaded={}, cached={}, failed={}) -> {}%",
                    outcome.name,
                    outcome.loaded,
                    outcome.from_cache,
                    outcome.failed,
                    self.progress()
                ),
            }
            self.emit(index, &updates);
            outcomes.push(outcome);
        }

        self.publish(true);

        PipelineReport {
            stages: outcomes,
            progress: self.progress(),
        }
    }

    fn emit(&self, index: usize, updates: &mpsc::UnboundedSender<ProgressUpdate>) {
        let stage = &self.stages[index];
        // A dropped receiver only means nobody is listening
        let _ = updates.send(ProgressUpdate {
            stage_name: stage.name.clone(),
            status: stage.status,
            overall_progress: self.progress(),
        });
        self.publish(false);
    }

    fn publish(&self, finished: bool) {
        let snapshot = PipelineSnapshot {
            progress: self.progress(),
            current_stage: self.current_stage_name().to_string(),
            finished,
        };
        self.state_tx.send_replace(snapshot);
    }
}

/// Loads every asset of one stage.
async fn run_stage<C, F, K>(
    stage: &PipelineStage,
    ctx: &C,
    fetcher: &F,
    cache: &mut SessionCache,
    sink: &mut K,
) -> StageOutcome
where
    C: TraverseContext,
    F: AssetFetcher,
    K: StageSink,
{
    let mut results: Vec<Option<Result<AssetPayload, AssetError>>> =
        Vec::with_capacity(stage.assets.len());
    let mut misses = Vec::new();
    let mut from_cache = 0;

    for (i, asset) in stage.assets.iter().enumerate() {
        match cache.get(&asset.key) {
            Some(payload) => {
                debug!("Cache hit: {}", asset.key);
                from_cache += 1;
                results.push(Some(Ok(payload)));
            }
            None => {
                results.push(None);
                misses.push(i);
            }
        }
    }

    // Fire-and-await-all: independent assets load concurrently
    let fetched = join_all(misses.iter().map(|&i| {
        let asset = &stage.assets[i];
        async move { (i, fetcher.fetch_asset(&asset.url).await) }
    }))
    .await;

    let mut fresh = vec![false; stage.assets.len()];
    for (i, result) in fetched {
        fresh[i] = true;
        results[i] = Some(result.map_err(AssetError::Fetch));
    }

    let loaded_at = ctx.now().as_secs_f64();
    let mut loaded = 0;
    let mut failed = 0;
    for ((asset, result), fresh) in stage.assets.iter().zip(results).zip(fresh) {
        let (applied, to_cache) = match result {
            Some(Ok(payload)) => {
                let to_cache = fresh.then(|| payload.clone());
                (sink.apply_asset(stage.kind, asset, payload), to_cache)
            }
            Some(Err(e)) => (Err(e), None),
            None => continue,
        };
        match applied {
            Ok(()) => {
                loaded += 1;
                if let Some(payload) = to_cache {
                    if let Err(e) = cache.put(&asset.key, payload, loaded_at) {
                        warn!("Cache write failed for {}: {}", asset.key, e);
                    }
                }
            }
            Err(e) => {
                warn!("Asset {} skipped in stage {}: {}", asset.key, stage.name, e);
                if !fresh && cache.remove(&asset.key) {
                    debug!("Evicted rejected cache entry: {}", asset.key);
                }
                failed += 1;
            }
        }
    }

    let status = if !stage.assets.is_empty() && loaded == 0 {
        StageStatus::Failed
    } else {
        StageStatus::Done
    };

    StageOutcome {
        name: stage.name.clone(),
        status,
        loaded,
        failed,
        from_cache,
        fetched: misses.len(),
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while building a pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("Stage weights sum to {sum}, expected 1")]
    InvalidWeights { sum: f64 },

    #[error("Stage {stage} has weight {weight} outside [0, 1]")]
    WeightOutOfRange { stage: String, weight: f64 },

    #[error("Stage {0} uses the reserved Finalizing kind")]
    ReservedStage(String),
}

/// Per-asset failure inside a stage. Always absorbed at the stage.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] EnvError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("scene rejected asset: {0}")]
    Scene(EnvError),

    #[error("rejected: {0}")]
    Rejected(String),
}

// ============================================================================
// TESTS
// ============================================================================
