//! The "PLAYBACK" Engine - Per-Frame Trajectory Synchronizer
//!
//! Keeps armed visual proxies in step with the simulation clock. The
//! synchronizer never pushes poses into the scene: it writes into a shared
//! proxy state, and the scene pulls from it through accessor closures at its
//! own draw time.
//!
//! ```text
//! frame N:  tick(FrameInfo) ── sample_at(track, t) ──> ProxyState (RwLock)
//! draw  N:  scene ── position_source() / orientation_source() ──┘
//! ```
//!
//! A tick is O(armed entities), never awaits and touches only resident
//! track data.

use crate::traverse_track::{Interpolator, LinearInterpolator, Track};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;
use traverse_env::{
    Accessor, CallbackId, EntityId, EntitySpec, FrameInfo, ModelRef, Pose, Scene, Timestamp,
};

// ============================================================================
// VISUAL PROXY
// ============================================================================

/// Latest pose written by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProxyState {
    pub position: Vector3<f64>,
    pub orientation: Option<UnitQuaternion<f64>>,
    pub visible: bool,

    /// Simulation time of the last pose write
    pub updated_at: Option<Timestamp>,
}

/// Renderable stand-in for an animated entity.
///
/// Clones share state. Exactly one proxy exists per entity for the lifetime
/// of a viewer; it is toggled visible/invisible rather than recreated.
#[derive(Debug, Clone)]
pub struct VisualProxy {
    owner: EntityId,
    state: Arc<RwLock<ProxyState>>,
}

impl VisualProxy {
    /// Creates a hidden proxy parked at `initial`.
    pub fn new(owner: EntityId, initial: Pose) -> Self {
        Self {
            owner,
            state: Arc::new(RwLock::new(ProxyState {
                position: initial.position,
                orientation: initial.orientation,
                visible: false,
                updated_at: None,
            })),
        }
    }

    pub fn owner(&self) -> &EntityId {
        &self.owner
    }

    pub fn state(&self) -> ProxyState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pose(&self) -> Pose {
        let state = self.state();
        Pose {
            position: state.position,
            orientation: state.orientation,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state().visible
    }

    pub fn set_visible(&self, visible: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .visible = visible;
    }

    /// Writes a pose. A pose without orientation keeps the previous one.
    pub fn set_pose(&self, pose: &Pose, time: Timestamp) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.position = pose.position;
        if pose.orientation.is_some() {
            state.orientation = pose.orientation;
        }
        state.updated_at = Some(time);
    }

    pub fn position_source(&self) -> Accessor<Vector3<f64>> {
        let state = Arc::clone(&self.state);
        Arc::new(move || state.read().unwrap_or_else(PoisonError::into_inner).position)
    }

    pub fn orientation_source(&self) -> Accessor<Option<UnitQuaternion<f64>>> {
        let state = Arc::clone(&self.state);
        Arc::new(move || state.read().unwrap_or_else(PoisonError::into_inner).orientation)
    }

    pub fn visibility_source(&self) -> Accessor<bool> {
        let state = Arc::clone(&self.state);
        Arc::new(move || state.read().unwrap_or_else(PoisonError::into_inner).visible)
    }

    /// Builds the scene entity description backed by this proxy.
    pub fn entity_spec(&self, model: ModelRef) -> EntitySpec {
        EntitySpec {
            name: self.owner.to_string(),
            model,
            position: self.position_source(),
            orientation: self.orientation_source(),
            visible: self.visibility_source(),
        }
    }
}

// ============================================================================
// SYNCHRONIZER
// ============================================================================

/// Configuration for the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynchronizerConfig {
    /// Hide a proxy while the clock is outside its track's availability
    pub hide_when_unavailable: bool,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            hide_when_unavailable: true,
        }
    }
}

struct ArmedEntry {
    track: Arc<Track>,
    proxy: VisualProxy,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub updated: usize,
    pub unavailable: usize,
}

/// Drives armed proxies from their tracks.
pub struct Synchronizer {
    config: SynchronizerConfig,
    interpolator: Arc<dyn Interpolator>,
    armed: HashMap<EntityId, ArmedEntry>,
    ticks: u64,
}

impl Synchronizer {
    pub fn new(config: SynchronizerConfig, interpolator: Arc<dyn Interpolator>) -> Self {
        Self {
            config,
            interpolator,
            armed: HashMap::new(),
            ticks: 0,
        }
    }

    pub fn config(&self) -> &SynchronizerConfig {
        &self.config
    }

    /// Arms a proxy against a track and reveals it.
    ///
    /// Arming an already armed entity is a no-op and returns `false`.
    pub fn arm(&mut self, track: Arc<Track>, proxy: VisualProxy) -> bool {
        let entity_id = track.entity_id().clone();
        if self.armed.contains_key(&entity_id) {
            return false;
        }
        debug!("Armed {}", entity_id);
        proxy.set_visible(true);
        self.armed.insert(entity_id, ArmedEntry { track, proxy });
        true
    }

    /// Disarms and hides an entity's proxy.
    ///
    /// Returns `false` (and does nothing) if the entity was not armed.
    pub fn disarm(&mut self, entity_id: &EntityId) -> bool {
        match self.armed.remove(entity_id) {
            Some(entry) => {
                entry.proxy.set_visible(false);
                debug!("Disarmed {}", entity_id);
                true
            }
            None => false,
        }
    }

    /// Disarms every entity except `keep`. Returns how many were disarmed.
    pub fn disarm_others(&mut self, keep: &EntityId) -> usize {
        let others: Vec<EntityId> = self
            .armed
            .keys()
            .filter(|id| *id != keep)
            .cloned()
            .collect();
        others.iter().filter(|id| self.disarm(id)).count()
    }

    /// Disarms everything. Returns how many were disarmed.
    pub fn disarm_all(&mut self) -> usize {
        let ids: Vec<EntityId> = self.armed.keys().cloned().collect();
        ids.iter().filter(|id| self.disarm(id)).count()
    }

    pub fn is_armed(&self, entity_id: &EntityId) -> bool {
        self.armed.contains_key(entity_id)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Armed entity ids, sorted.
    pub fn armed_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.armed.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advances every armed proxy to `frame.time`.
    ///
    /// Outside a track's availability the proxy keeps its last pose and is
    /// optionally hidden until the clock returns into range. While the clock
    /// is paused nothing is written, even if the time was moved.
    pub fn tick(&mut self, frame: &FrameInfo) -> TickStats {
        self.ticks += 1;
        let mut stats = TickStats::default();
        if !frame.animating {
            return stats;
        }

        for entry in self.armed.values() {
            match entry.track.sample_at(frame.time, self.interpolator.as_ref()) {
                Some(pose) => {
                    entry.proxy.set_pose(&pose, frame.time);
                    if self.config.hide_when_unavailable && !entry.proxy.is_visible() {
                        entry.proxy.set_visible(true);
                    }
                    stats.updated += 1;
                }
                None => {
                    if self.config.hide_when_unavailable {
                        entry.proxy.set_visible(false);
                    }
                    stats.unavailable += 1;
                }
            }
        }

        stats
    }

    /// Registers `sync` as a per-frame callback on `scene`.
    pub fn attach<S: Scene + ?Sized>(sync: &Arc<Mutex<Synchronizer>>, scene: &S) -> CallbackId {
        let sync = Arc::clone(sync);
        scene.register_per_frame_callback(Box::new(move |frame: &FrameInfo| {
            sync.lock().unwrap_or_else(PoisonError::into_inner).tick(frame);
        }))
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(SynchronizerConfig::default(), Arc::new(LinearInterpolator))
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .field("armed", &self.armed_ids())
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
