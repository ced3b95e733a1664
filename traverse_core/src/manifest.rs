//! Viewer configuration and the preload manifest.
//!
//! The manifest names what to load; `stages()` turns it into the default
//! four-stage pipeline (terrain, models, trajectories, landmarks).

use crate::idle::IdleRotationConfig;
use crate::traverse_cache::CacheConfig;
use crate::traverse_camera::CameraConfig;
use crate::traverse_pipeline::{AssetRequest, PipelineStage, StageKind};
use crate::traverse_sync::SynchronizerConfig;
use serde::{Deserialize, Serialize};
use traverse_env::EntityId;

pub const TERRAIN_STAGE: &str = "Loading terrain";
pub const MODELS_STAGE: &str = "Preloading vehicle models";
pub const TRAJECTORIES_STAGE: &str = "Loading trajectories";
pub const LANDMARKS_STAGE: &str = "Loading landmarks";

/// A plain asset entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub key: String,
    pub url: String,
}

/// A vehicle model entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub entity_id: EntityId,

    /// Cache key; defaults to `model:<entity_id>`
    #[serde(default)]
    pub key: Option<String>,

    pub url: String,
}

impl ModelSpec {
    pub fn cache_key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("model:{}", self.entity_id))
    }
}

/// Relative weight of each stage. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageWeights {
    pub terrain: f64,
    pub models: f64,
    pub trajectories: f64,
    pub landmarks: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            terrain: 0.2,
            models: 0.3,
            trajectories: 0.3,
            landmarks: 0.2,
        }
    }
}

/// Everything the viewer preloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadManifest {
    pub terrain: Vec<AssetSpec>,
    pub models: Vec<ModelSpec>,
    pub trajectories: Vec<AssetSpec>,
    pub landmarks: Vec<AssetSpec>,
    pub weights: StageWeights,
}

impl PreloadManifest {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Builds the ordered stage list.
    pub fn stages(&self) -> Vec<PipelineStage> {
        let plain = |assets: &[AssetSpec]| -> Vec<AssetRequest> {
            assets
                .iter()
                .map(|a| AssetRequest::new(a.key.clone(), a.url.clone()))
                .collect()
        };

        vec![
            PipelineStage::new(TERRAIN_STAGE, StageKind::Terrain, self.weights.terrain)
                .with_assets(plain(&self.terrain)),
            PipelineStage::new(MODELS_STAGE, StageKind::Models, self.weights.models).with_assets(
                self.models.iter().map(|m| {
                    AssetRequest::new(m.cache_key(), m.url.clone()).for_entity(m.entity_id.clone())
                }),
            ),
            PipelineStage::new(
                TRAJECTORIES_STAGE,
                StageKind::Trajectories,
                self.weights.trajectories,
            )
            .with_assets(plain(&self.trajectories)),
            PipelineStage::new(LANDMARKS_STAGE, StageKind::Landmarks, self.weights.landmarks)
                .with_assets(plain(&self.landmarks)),
        ]
    }
}

/// Configuration for a viewer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub cache: CacheConfig,
    pub camera: CameraConfig,
    pub synchronizer: SynchronizerConfig,
    pub idle_rotation: IdleRotationConfig,

    /// Start the idle orbit once preloading finishes
    pub rotate_on_idle: bool,

    /// Radius of the bounding sphere framed around a selected vehicle
    pub entity_radius: f64,

    /// Radius for landmarks that declare none
    pub landmark_radius: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            camera: CameraConfig::default(),
            synchronizer: SynchronizerConfig::default(),
            idle_rotation: IdleRotationConfig::default(),
            rotate_on_idle: true,
            entity_radius: 5.0,
            landmark_radius: 25.0,
        }
    }
}
