//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use traverse_env::{
    AssetFetcher, AssetPayload, CallbackId, CameraView, EntityHandle, EntitySpec, EnvError,
    FlyToRequest, FrameCallback, FrameInfo, Pose, Scene, Timestamp,
};

/// Scene double driven by hand: tests advance frames and complete flights.
#[derive(Default)]
pub struct TestScene {
    entities: Mutex<HashMap<EntityHandle, EntitySpec>>,
    callbacks: Mutex<Vec<(CallbackId, FrameCallback)>>,
    flight: Mutex<Option<FlyToRequest>>,
    view: Mutex<CameraView>,
    time: Mutex<Timestamp>,
    terrain: Mutex<Vec<String>>,
    next_id: AtomicU64,
    frames: AtomicU64,
    pub flights_issued: AtomicUsize,
    pub flights_cancelled: AtomicUsize,
}

impl TestScene {
    pub fn set_time(&self, time: Timestamp) {
        *self.time.lock().unwrap() = time;
    }

    /// Runs every per-frame callback once.
    pub fn frame(&self, delta_secs: f64) {
        let info = FrameInfo {
            frame: self.frames.fetch_add(1, Ordering::SeqCst),
            time: *self.time.lock().unwrap(),
            delta_secs,
            animating: true,
        };
        let mut callbacks = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for (_, callback) in callbacks.iter_mut() {
            callback(&info);
        }
        let mut slot = self.callbacks.lock().unwrap();
        callbacks.append(&mut slot);
        *slot = callbacks;
    }

    /// Lands the current flight and runs its completion.
    pub fn complete_flight(&self) -> bool {
        let request = self.flight.lock().unwrap().take();
        match request {
            Some(request) => {
                *self.view.lock().unwrap() = request.destination;
                (request.on_complete)();
                true
            }
            None => false,
        }
    }

    /// Removes the current flight without completing it.
    pub fn take_flight(&self) -> Option<FlyToRequest> {
        self.flight.lock().unwrap().take()
    }

    pub fn flight_destination(&self) -> Option<CameraView> {
        self.flight.lock().unwrap().as_ref().map(|r| r.destination)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    /// Evaluates an entity's accessors the way a renderer would.
    pub fn draw(&self, name: &str) -> Option<(Pose, bool)> {
        let entities = self.entities.lock().unwrap();
        entities.values().find(|spec| spec.name == name).map(|spec| {
            let pose = Pose {
                position: (spec.position)(),
                orientation: (spec.orientation)(),
            };
            (pose, (spec.visible)())
        })
    }

    pub fn terrain_keys(&self) -> Vec<String> {
        self.terrain.lock().unwrap().clone()
    }
}

impl Scene for TestScene {
    fn add_entity(&self, spec: EntitySpec) -> Result<EntityHandle, EnvError> {
        let handle = EntityHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entities.lock().unwrap().insert(handle, spec);
        Ok(handle)
    }

    fn remove_entity(&self, handle: EntityHandle) -> bool {
        self.entities.lock().unwrap().remove(&handle).is_some()
    }

    fn load_terrain(&self, key: &str, _payload: &AssetPayload) -> Result<(), EnvError> {
        self.terrain.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn register_per_frame_callback(&self, callback: FrameCallback) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks.lock().unwrap().push((id, callback));
        id
    }

    fn unregister_per_frame_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    fn fly_to(&self, request: FlyToRequest) {
        self.flights_issued.fetch_add(1, Ordering::SeqCst);
        *self.flight.lock().unwrap() = Some(request);
    }

    fn cancel_flight(&self) {
        self.flights_cancelled.fetch_add(1, Ordering::SeqCst);
        self.flight.lock().unwrap().take();
    }

    fn set_view(&self, view: CameraView) {
        *self.view.lock().unwrap() = view;
    }

    fn camera_view(&self) -> CameraView {
        *self.view.lock().unwrap()
    }

    fn now(&self) -> Timestamp {
        *self.time.lock().unwrap()
    }

    fn is_animating(&self) -> bool {
        true
    }
}

/// In-memory fetcher with per-url failure injection.
#[derive(Default)]
pub struct MapFetcher {
    assets: HashMap<String, AssetPayload>,
    failing: HashSet<String>,
    pub fetches: AtomicUsize,
}

impl MapFetcher {
    pub fn insert(&mut self, url: &str, payload: AssetPayload) {
        self.assets.insert(url.to_string(), payload);
    }

    pub fn fail(&mut self, url: &str) {
        self.failing.insert(url.to_string());
    }
}

#[async_trait]
impl AssetFetcher for MapFetcher {
    async fn fetch_asset(&self, url: &str) -> Result<AssetPayload, EnvError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(url) {
            return Err(EnvError::fetch(url, "injected failure"));
        }
        self.assets
            .get(url)
            .cloned()
            .ok_or_else(|| EnvError::NotFound(url.to_string()))
    }
}
