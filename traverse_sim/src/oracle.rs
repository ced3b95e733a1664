//! Mission oracle for simulation.
//!
//! The oracle invents a mission from a seed and keeps the ground truth:
//! - Rover traverses (heading random walk over a smooth height field)
//! - Landmarks along the way
//! - Opaque model and terrain blobs
//!
//! It publishes everything to a `SimFetcher` and returns the manifest a
//! viewer would load.

use crate::fetcher::SimFetcher;
use nalgebra::{UnitQuaternion, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use traverse_core::documents::encode_trajectory_document;
use traverse_core::manifest::{AssetSpec, ModelSpec};
use traverse_core::traverse_track::{Sample, SolOrigin, TimeInterval};
use traverse_core::{PreloadManifest, Track, TrackError};
use traverse_env::{AssetPayload, EntityId, Timestamp};

pub const TERRAIN_URL: &str = "terrain/tileset.bin";
pub const TRAJECTORY_URL: &str = "trajectories/traverse.czml";
pub const LANDMARK_URL: &str = "landmarks/waypoints.geojson";

/// Url a rover's model is published under.
pub fn model_url(entity_id: &EntityId) -> String {
    format!("models/{entity_id}.glb")
}

/// Shape of the generated mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionConfig {
    /// Rover names, one track each
    pub rovers: Vec<String>,

    /// Samples per track
    pub sample_count: usize,

    /// Seconds between samples
    pub sample_interval: f64,

    /// Offset between consecutive rovers' start times
    pub start_stagger: f64,

    /// Sol index of the first rover's first sample
    pub first_sol: i64,

    /// Landmarks placed along the first rover's path
    pub landmark_count: usize,

    /// Mean distance driven per sample interval (meters)
    pub mean_step: f64,

    /// Heading change per sample interval (rad, std dev)
    pub heading_noise_std: f64,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            rovers: vec!["perseverance".to_string(), "curiosity".to_string()],
            sample_count: 240,
            sample_interval: 600.0,
            start_stagger: 30_000.0,
            first_sol: 0,
            landmark_count: 3,
            mean_step: 20.0,
            heading_noise_std: 0.3,
        }
    }
}

/// Everything a viewer needs to play one mission.
#[derive(Debug, Clone)]
pub struct SyntheticMission {
    /// Ground truth tracks
    pub tracks: Vec<Track>,

    /// Trajectory document encoding `tracks`
    pub document: Value,

    /// Landmark feature collection
    pub landmarks: Value,

    /// Model blob per rover
    pub models: Vec<(EntityId, Vec<u8>)>,

    /// Terrain blob
    pub terrain: Vec<u8>,
}

impl SyntheticMission {
    pub fn track(&self, entity_id: &EntityId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.entity_id() == entity_id)
    }

    pub fn rover_ids(&self) -> Vec<EntityId> {
        self.tracks.iter().map(|t| t.entity_id().clone()).collect()
    }

    /// Earliest availability start over all tracks.
    pub fn start_time(&self) -> Timestamp {
        self.tracks
            .iter()
            .map(|t| t.availability().start)
            .fold(f64::INFINITY, f64::min)
    }

    /// Publishes every asset and returns the matching manifest.
    pub fn install(&self, fetcher: &SimFetcher) -> PreloadManifest {
        fetcher.insert(TERRAIN_URL, AssetPayload::bytes(self.terrain.clone()));
        fetcher.insert(TRAJECTORY_URL, AssetPayload::Json(self.document.clone()));
        fetcher.insert(LANDMARK_URL, AssetPayload::Json(self.landmarks.clone()));

        let mut models = Vec::with_capacity(self.models.len());
        for (entity_id, data) in &self.models {
            let url = model_url(entity_id);
            fetcher.insert(url.clone(), AssetPayload::bytes(data.clone()));
            models.push(ModelSpec {
                entity_id: entity_id.clone(),
                key: None,
                url,
            });
        }

        let asset = |key: &str, url: &str| AssetSpec {
            key: key.to_string(),
            url: url.to_string(),
        };
        PreloadManifest {
            terrain: vec![asset("terrain", TERRAIN_URL)],
            models,
            trajectories: vec![asset("traverse", TRAJECTORY_URL)],
            landmarks: vec![asset("waypoints", LANDMARK_URL)],
            ..PreloadManifest::default()
        }
    }
}

/// The oracle - generates missions from a seed.
pub struct MissionOracle {
    /// Master seed
    seed: u64,

    /// RNG for trajectory generation
    rng: ChaCha8Rng,
}

impl MissionOracle {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Smooth synthetic terrain elevation.
    pub fn terrain_height(x: f64, y: f64) -> f64 {
        5.0 * (x / 200.0).sin() * (y / 300.0).cos()
    }

    /// Generates a full mission.
    pub fn generate_mission(&mut self, config: &MissionConfig) -> Result<SyntheticMission, OracleError> {
        let mut tracks = Vec::with_capacity(config.rovers.len());
        for (index, name) in config.rovers.iter().enumerate() {
            let start_time = index as f64 * config.start_stagger;
            let sols_elapsed = (start_time / traverse_core::SOL_SECONDS).floor() as i64;
            let origin = SolOrigin {
                start_time,
                start_index: config.first_sol + sols_elapsed,
            };
            let base = Vector3::new(index as f64 * 500.0, 0.0, 0.0);
            tracks.push(self.generate_track(EntityId::new(name.as_str()), start_time, base, origin, config)?);
        }

        let landmarks = match tracks.first() {
            Some(track) => self.landmark_collection(track, config.landmark_count),
            None => json!({ "type": "FeatureCollection", "features": [] }),
        };

        let models = tracks
            .iter()
            .map(|t| (t.entity_id().clone(), self.blob(b"glTF", 512)))
            .collect();
        let terrain = self.blob(b"TILE", 4096);
        let document = encode_trajectory_document(&tracks);

        Ok(SyntheticMission {
            tracks,
            document,
            landmarks,
            models,
            terrain,
        })
    }

    /// Drives one rover from `base`.
    pub fn generate_track(
        &mut self,
        entity_id: EntityId,
        start_time: Timestamp,
        base: Vector3<f64>,
        origin: SolOrigin,
        config: &MissionConfig,
    ) -> Result<Track, OracleError> {
        let heading_noise = Normal::new(0.0, config.heading_noise_std)
            .map_err(|e| OracleError::InvalidConfig(format!("heading noise: {e}")))?;
        if !(config.mean_step.is_finite() && config.mean_step > 0.0) {
            return Err(OracleError::InvalidConfig(format!(
                "mean step {} must be positive",
                config.mean_step
            )));
        }

        let mut heading: f64 = self.rng.gen_range(0.0..std::f64::consts::TAU);
        let mut position = base;
        let mut samples = Vec::with_capacity(config.sample_count);

        for i in 0..config.sample_count {
            let time = start_time + i as f64 * config.sample_interval;
            position.z = Self::terrain_height(position.x, position.y);
            let yaw = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), heading);
            samples.push(Sample::new(time, position).with_orientation(yaw));

            heading += heading_noise.sample(&mut self.rng);
            let step = config.mean_step * self.rng.gen_range(0.5..1.5);
            position.x += step * heading.cos();
            position.y += step * heading.sin();
        }

        let availability = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => Some(TimeInterval::new(first.time, last.time)?),
            _ => None,
        };
        Ok(Track::sampled(entity_id, availability, samples)?.with_sol_origin(origin))
    }

    /// Places landmarks at evenly spaced samples of `track`.
    fn landmark_collection(&mut self, track: &Track, count: usize) -> Value {
        let samples = track.samples();
        let features: Vec<Value> = (0..count)
            .filter_map(|n| {
                let index = (n + 1) * samples.len() / (count + 1);
                samples.get(index).map(|s| (n, s.position))
            })
            .map(|(n, position)| {
                let radius = self.rng.gen_range(15.0..40.0);
                json!({
                    "type": "Feature",
                    "properties": {
                        "id": format!("waypoint-{n}"),
                        "name": format!("Waypoint {}", n + 1),
                        "radius": radius,
                    },
                    "geometry": {
                        "type": "Point",
                        "coordinates": [position.x, position.y, position.z],
                    },
                })
            })
            .collect();
        json!({ "type": "FeatureCollection", "features": features })
    }

    fn blob(&mut self, magic: &[u8], len: usize) -> Vec<u8> {
        let mut data = magic.to_vec();
        data.extend((magic.len()..len).map(|_| self.rng.gen::<u8>()));
        data
    }
}

/// Errors that can occur while generating a mission.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("Invalid mission configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Track(#[from] TrackError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use traverse_core::{decode_landmark_collection, decode_trajectory_document};

    #[test]
    fn test_mission_is_deterministic() {
        let config = MissionConfig::default();
        let a = MissionOracle::new(42).generate_mission(&config).unwrap();
        let b = MissionOracle::new(42).generate_mission(&config).unwrap();
        let c = MissionOracle::new(43).generate_mission(&config).unwrap();

        assert_eq!(a.document, b.document);
        assert_eq!(a.terrain, b.terrain);
        assert_ne!(a.document, c.document);
    }

    #[test]
    fn test_mission_shape() {
        let config = MissionConfig::default();
        let mission = MissionOracle::new(7).generate_mission(&config).unwrap();

        assert_eq!(mission.rover_ids(), vec![EntityId::new("perseverance"), EntityId::new("curiosity")]);
        let curiosity = mission.track(&EntityId::new("curiosity")).unwrap();
        assert_eq!(curiosity.availability().start, 30_000.0);
        assert_eq!(curiosity.samples().len(), 240);
        assert_eq!(mission.start_time(), 0.0);
        assert!(mission.models.iter().all(|(_, data)| data.starts_with(b"glTF")));

        let decoded = decode_trajectory_document(&mission.document).unwrap();
        assert_eq!(decoded.len(), 2);
        let landmarks = decode_landmark_collection(&mission.landmarks, 25.0).unwrap();
        assert_eq!(landmarks.len(), 3);
    }

    #[test]
    fn test_install_publishes_manifest_assets() {
        let mission = MissionOracle::new(1).generate_mission(&MissionConfig::default()).unwrap();
        let fetcher = SimFetcher::new(crate::context::SimContext::shared(1));
        let manifest = mission.install(&fetcher);

        assert_eq!(manifest.models.len(), 2);
        assert_eq!(manifest.models[0].url, "models/perseverance.glb");
        assert_eq!(manifest.terrain[0].url, TERRAIN_URL);
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = MissionConfig {
            mean_step: 0.0,
            ..MissionConfig::default()
        };
        assert!(matches!(
            MissionOracle::new(1).generate_mission(&config),
            Err(OracleError::InvalidConfig(_))
        ));

        let config = MissionConfig {
            sample_count: 0,
            ..MissionConfig::default()
        };
        assert!(matches!(
            MissionOracle::new(1).generate_mission(&config),
            Err(OracleError::Track(TrackError::EmptyTrack(_)))
        ));
    }

    proptest! {
        #[test]
        fn prop_steps_stay_bounded(seed in any::<u64>()) {
            let config = MissionConfig {
                rovers: vec!["rover".to_string()],
                sample_count: 50,
                ..MissionConfig::default()
            };
            let mission = MissionOracle::new(seed).generate_mission(&config).unwrap();
            let samples = mission.tracks[0].samples();

            for pair in samples.windows(2) {
                let planar = (pair[1].position - pair[0].position).xy().norm();
                prop_assert!(planar <= config.mean_step * 1.5 + 1e-9);
                prop_assert!(pair[1].time > pair[0].time);
            }
        }
    }
}
