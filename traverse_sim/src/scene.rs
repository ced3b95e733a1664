//! Headless scene implementing `Scene` for deterministic playback.
//!
//! Each `step` is one rendered frame:
//!
//! ```text
//! step():  advance clock (if animating)
//!          advance camera flight ── landed? ── on_complete()
//!          run per-frame callbacks (synchronizer, idle rotation)
//!          draw: evaluate every entity's accessors into a snapshot
//! ```
//!
//! No lock is held while user code runs, so callbacks may call back into the
//! scene.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use traverse_core::CameraFlight;
use traverse_env::{
    AssetPayload, CallbackId, CameraView, EntityHandle, EntitySpec, EnvError, FlyToRequest,
    FrameCallback, FrameInfo, Scene, Timestamp,
};

/// Configuration for the simulated scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimSceneConfig {
    /// Rendered frames per wall-clock second
    pub frame_rate_hz: u32,

    /// Simulation seconds per wall-clock second while animating
    pub time_multiplier: f64,

    /// Simulation time at frame 0
    pub start_time: Timestamp,
}

impl Default for SimSceneConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: 60,
            time_multiplier: 600.0,
            start_time: 0.0,
        }
    }
}

impl SimSceneConfig {
    fn validate(&self) -> Result<(), SimSceneError> {
        if self.frame_rate_hz == 0 {
            return Err(SimSceneError::InvalidConfig("frame rate must be positive".into()));
        }
        if !self.time_multiplier.is_finite() || self.time_multiplier < 0.0 {
            return Err(SimSceneError::InvalidConfig(format!(
                "time multiplier {} is not a non-negative number",
                self.time_multiplier
            )));
        }
        if !self.start_time.is_finite() {
            return Err(SimSceneError::InvalidConfig("start time must be finite".into()));
        }
        Ok(())
    }
}

/// One entity as drawn in the last frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedEntity {
    pub name: String,
    pub position: Vector3<f64>,
    pub orientation: Option<UnitQuaternion<f64>>,
    pub visible: bool,
}

struct ActiveFlight {
    flight: CameraFlight,
    elapsed: Duration,
    on_complete: Box<dyn FnOnce() + Send>,
}

struct SceneState {
    time: Timestamp,
    animating: bool,
    frame: u64,
    view: CameraView,
    flight: Option<ActiveFlight>,
    entities: BTreeMap<EntityHandle, EntitySpec>,
    rendered: Vec<RenderedEntity>,
    terrain: Vec<String>,
    next_id: u64,
    flights_completed: u64,
}

/// A scene without a renderer.
pub struct SimScene {
    config: SimSceneConfig,
    state: Mutex<SceneState>,
    callbacks: Mutex<BTreeMap<CallbackId, Arc<Mutex<FrameCallback>>>>,
}

impl SimScene {
    pub fn new(config: SimSceneConfig) -> Result<Self, SimSceneError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(SceneState {
                time: config.start_time,
                animating: true,
                frame: 0,
                view: CameraView::default(),
                flight: None,
                entities: BTreeMap::new(),
                rendered: Vec::new(),
                terrain: Vec::new(),
                next_id: 1,
                flights_completed: 0,
            }),
            callbacks: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn config(&self) -> &SimSceneConfig {
        &self.config
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.config.frame_rate_hz))
    }

    /// Renders one frame.
    pub fn step(&self) -> FrameInfo {
        let delta = self.frame_interval();
        let delta_secs = delta.as_secs_f64();

        let (info, landed) = {
            let mut state = self.lock_state();
            if state.animating {
                state.time += delta_secs * self.config.time_multiplier;
            }
            state.frame += 1;

            let mut landed = None;
            if let Some(mut active) = state.flight.take() {
                active.elapsed += delta;
                if active.flight.is_complete(active.elapsed) {
                    state.view = active.flight.to;
                    state.flights_completed += 1;
                    landed = Some(active.on_complete);
                } else {
                    state.view = active.flight.view_at(active.elapsed);
                    state.flight = Some(active);
                }
            }

            let info = FrameInfo {
                frame: state.frame,
                time: state.time,
                delta_secs,
                animating: state.animating,
            };
            (info, landed)
        };

        if let Some(on_complete) = landed {
            debug!("Flight landed at frame {}", info.frame);
            on_complete();
        }

        let callbacks: Vec<Arc<Mutex<FrameCallback>>> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
            (*callback)(&info);
        }

        self.draw();
        info
    }

    /// Renders `frames` frames and returns the last frame's info.
    pub fn run_frames(&self, frames: u64) -> Option<FrameInfo> {
        (0..frames).map(|_| self.step()).last()
    }

    pub fn set_animating(&self, animating: bool) {
        self.lock_state().animating = animating;
    }

    pub fn set_time(&self, time: Timestamp) {
        self.lock_state().time = time;
    }

    pub fn frame(&self) -> u64 {
        self.lock_state().frame
    }

    /// Entities as drawn in the last frame, in creation order.
    pub fn rendered(&self) -> Vec<RenderedEntity> {
        self.lock_state().rendered.clone()
    }

    pub fn rendered_entity(&self, name: &str) -> Option<RenderedEntity> {
        self.lock_state()
            .rendered
            .iter()
            .find(|e| e.name == name)
            .cloned()
    }

    pub fn flight_in_progress(&self) -> bool {
        self.lock_state().flight.is_some()
    }

    pub fn flights_completed(&self) -> u64 {
        self.lock_state().flights_completed
    }

    pub fn entity_count(&self) -> usize {
        self.lock_state().entities.len()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn terrain_keys(&self) -> Vec<String> {
        self.lock_state().terrain.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, SceneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(state: &mut SceneState) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn draw(&self) {
        let specs: Vec<EntitySpec> = self.lock_state().entities.values().cloned().collect();
        let rendered = specs
            .iter()
            .map(|spec| RenderedEntity {
                name: spec.name.clone(),
                position: (spec.position)(),
                orientation: (spec.orientation)(),
                visible: (spec.visible)(),
            })
            .collect();
        self.lock_state().rendered = rendered;
    }
}

impl Scene for SimScene {
    fn add_entity(&self, spec: EntitySpec) -> Result<EntityHandle, EnvError> {
        if spec.model.data.is_empty() {
            return Err(EnvError::scene(format!("model {} is empty", spec.model.key)));
        }
        let mut state = self.lock_state();
        let handle = EntityHandle(Self::next_id(&mut state));
        debug!("Entity {} added as {:?}", spec.name, handle);
        state.entities.insert(handle, spec);
        Ok(handle)
    }

    fn remove_entity(&self, handle: EntityHandle) -> bool {
        self.lock_state().entities.remove(&handle).is_some()
    }

    fn load_terrain(&self, key: &str, payload: &AssetPayload) -> Result<(), EnvError> {
        if payload.size_bytes() == 0 {
            return Err(EnvError::scene(format!("terrain {key} is empty")));
        }
        self.lock_state().terrain.push(key.to_string());
        Ok(())
    }

    fn register_per_frame_callback(&self, callback: FrameCallback) -> CallbackId {
        let id = CallbackId(Self::next_id(&mut self.lock_state()));
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(callback)));
        id
    }

    fn unregister_per_frame_callback(&self, id: CallbackId) -> bool {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn fly_to(&self, request: FlyToRequest) {
        let mut state = self.lock_state();
        let flight = CameraFlight::new(state.view, request.destination, request.easing, request.duration);
        if state.flight.is_some() {
            debug!("Replacing flight in progress");
        }
        state.flight = Some(ActiveFlight {
            flight,
            elapsed: Duration::ZERO,
            on_complete: request.on_complete,
        });
    }

    fn cancel_flight(&self) {
        self.lock_state().flight = None;
    }

    fn set_view(&self, view: CameraView) {
        self.lock_state().view = view;
    }

    fn camera_view(&self) -> CameraView {
        self.lock_state().view
    }

    fn now(&self) -> Timestamp {
        self.lock_state().time
    }

    fn is_animating(&self) -> bool {
        self.lock_state().animating
    }
}

/// Errors that can occur while building a simulated scene.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimSceneError {
    #[error("Invalid scene configuration: {0}")]
    InvalidConfig(String),
}
