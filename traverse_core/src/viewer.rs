//! Viewer - Wires the engines into one per-instance context object.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Viewer                             │
//! │  ctx: TraverseContext   fetcher: AssetFetcher   scene: Scene │
//! │                                                              │
//! │  ┌──────────┐  ┌────────────┐  ┌──────────┐  ┌────────────┐  │
//! │  │  CACHE   │  │  PRELOAD   │  │  TRACKS  │  │  PLAYBACK  │  │
//! │  │ Session  │<-│  Pipeline  │->│  Model   │->│Synchronizer│  │
//! │  └──────────┘  └────────────┘  └──────────┘  └────────────┘  │
//! │                       │                            ^ arm     │
//! │                       v finalize                   │         │
//! │                ┌─────────────┐              ┌────────────┐   │
//! │                │ IdleRotation│              │   FLIGHT   │   │
//! │                └─────────────┘              │ Controller │   │
//! │                                             └────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! One viewer owns everything it creates; `teardown` (or drop) releases the
//! scene callbacks, proxies, cache and tracks.

use crate::documents::{decode_landmark_collection, decode_trajectory_document, payload_json, Landmark};
use crate::idle::{IdleRotation, IdleRotationGuard};
use crate::manifest::{PreloadManifest, ViewerConfig};
use crate::traverse_cache::{CacheStats, SessionCache};
use crate::traverse_camera::{CameraController, CameraState, FlightTicket, FlyTarget};
use crate::traverse_pipeline::{
    progress_channel, AssetError, AssetRequest, PipelineError, PipelineMonitor, PipelineReport,
    PreloadPipeline, ProgressUpdate, StageKind, StageSink,
};
use crate::traverse_sync::{Synchronizer, VisualProxy};
use crate::traverse_track::{TrackError, TrackModel};
use nalgebra::Vector3;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use traverse_env::{
    AssetFetcher, AssetPayload, CallbackId, EntityHandle, EntityId, EnvError, ModelRef, Pose,
    Scene, Timestamp, TraverseContext,
};

// ============================================================================
// TYPES
// ============================================================================

/// Lifecycle of a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerStatus {
    /// Scene is up, nothing loaded yet
    Mounted,
    Loading,
    Ready,
    TornDown,
}

/// What is currently highlighted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Entity(EntityId),
    Landmark(String),
}

/// Notifications for the surrounding UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    /// Camera arrived at a selected entity
    EntityFocused(EntityId),

    /// Camera arrived at a selected landmark
    LandmarkFocused(String),

    /// View was reset to home
    Reset,

    /// Preloading finished; instructional UI may be shown
    InstructionsReady,
}

struct ProxyEntry {
    proxy: VisualProxy,
    handle: EntityHandle,
}

// ============================================================================
// VIEWER
// ============================================================================

/// A mission viewer instance.
pub struct Viewer<S, F, C>
where
    S: Scene,
    F: AssetFetcher,
    C: TraverseContext,
{
    ctx: Arc<C>,
    fetcher: Arc<F>,
    scene: Arc<S>,
    config: ViewerConfig,

    cache: SessionCache,
    tracks: TrackModel,
    models: HashMap<EntityId, ModelRef>,
    landmarks: BTreeMap<String, Landmark>,

    /// Exactly one proxy per animated entity, created on first selection
    proxies: HashMap<EntityId, ProxyEntry>,

    sync: Arc<Mutex<Synchronizer>>,
    sync_callback: Option<CallbackId>,
    camera: CameraController<S>,
    idle: Option<IdleRotationGuard<S>>,

    pipeline: Option<PreloadPipeline>,
    monitor: Option<PipelineMonitor>,

    status: ViewerStatus,
    selection: Option<Selection>,
    events: mpsc::UnboundedSender<ViewerEvent>,
}

impl<S, F, C> Viewer<S, F, C>
where
    S: Scene,
    F: AssetFetcher,
    C: TraverseContext,
{
    /// Creates the scene and the viewer around it.
    ///
    /// A scene factory failure is terminal: no viewer is created.
    pub fn mount<Factory>(
        ctx: Arc<C>,
        fetcher: Arc<F>,
        config: ViewerConfig,
        factory: Factory,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ViewerEvent>), ViewerError>
    where
        Factory: FnOnce() -> Result<S, EnvError>,
    {
        let scene = factory().map_err(|e| {
            error!("Scene initialization failed: {}", e);
            ViewerError::SceneInitialization(e)
        })?;
        let scene = Arc::new(scene);
        scene.set_view(config.camera.home);

        let tracks = TrackModel::new();
        let sync = Arc::new(Mutex::new(Synchronizer::new(
            config.synchronizer,
            tracks.interpolator(),
        )));
        let sync_callback = Synchronizer::attach(&sync, scene.as_ref());
        let camera = CameraController::new(Arc::clone(&scene), config.camera);
        let (events, rx) = mpsc::unbounded_channel();

        info!("Viewer mounted");

        let viewer = Self {
            ctx,
            fetcher,
            scene,
            cache: SessionCache::new(config.cache),
            tracks,
            models: HashMap::new(),
            landmarks: BTreeMap::new(),
            proxies: HashMap::new(),
            sync,
            sync_callback: Some(sync_callback),
            camera,
            idle: None,
            pipeline: None,
            monitor: None,
            status: ViewerStatus::Mounted,
            selection: None,
            events,
            config,
        };
        Ok((viewer, rx))
    }

    // ------------------------------------------------------------------------
    // Preload
    // ------------------------------------------------------------------------

    /// Builds the pipeline for `manifest` and returns a handle for polling.
    pub fn plan_preload(&mut self, manifest: &PreloadManifest) -> Result<PipelineMonitor, ViewerError> {
        self.ensure_live()?;
        let pipeline = PreloadPipeline::new(manifest.stages())?;
        let monitor = pipeline.monitor();
        self.monitor = Some(monitor.clone());
        self.pipeline = Some(pipeline);
        Ok(monitor)
    }

    /// Runs the planned pipeline, streaming transitions on `updates`.
    pub async fn run_preload(
        &mut self,
        updates: mpsc::UnboundedSender<ProgressUpdate>,
    ) -> Result<PipelineReport, ViewerError> {
        self.ensure_live()?;
        let mut pipeline = self.pipeline.take().ok_or(ViewerError::NothingPlanned)?;
        self.status = ViewerStatus::Loading;

        let mut sink = ViewerSink {
            scene: &self.scene,
            config: &self.config,
            tracks: &mut self.tracks,
            models: &mut self.models,
            landmarks: &mut self.landmarks,
            idle: &mut self.idle,
            events: &self.events,
        };
        let report = pipeline
            .run(
                self.ctx.as_ref(),
                self.fetcher.as_ref(),
                &mut self.cache,
                &mut sink,
                updates,
            )
            .await;

        if report.progress < 100 {
            warn!("Preload stalled at {}%", report.progress);
        }
        info!(
            "Preload finished: {} tracks, {} models, {} landmarks",
            self.tracks.len(),
            self.models.len(),
            self.landmarks.len()
        );

        self.pipeline = Some(pipeline);
        self.status = ViewerStatus::Ready;
        Ok(report)
    }

    /// Plans and runs the pipeline for `manifest`.
    pub async fn preload(&mut self, manifest: &PreloadManifest) -> Result<PipelineReport, ViewerError> {
        self.plan_preload(manifest)?;
        let (tx, _rx) = progress_channel();
        self.run_preload(tx).await
    }

    /// Overall preload progress in percent.
    pub fn progress(&self) -> u8 {
        self.monitor.as_ref().map_or(0, PipelineMonitor::progress)
    }

    pub fn current_stage_name(&self) -> String {
        self.monitor
            .as_ref()
            .map(PipelineMonitor::current_stage_name)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    /// Focuses an animated entity.
    ///
    /// Other entities are disarmed and hidden. The entity is armed when the
    /// flight lands, provided its model loaded; without a model the camera
    /// still flies there.
    pub fn on_entity_selected(&mut self, entity_id: &EntityId) -> Result<FlightTicket, ViewerError> {
        self.ensure_live()?;
        let track = self
            .tracks
            .get(entity_id)
            .ok_or_else(|| ViewerError::UnknownEntity(entity_id.clone()))?;

        self.dispose_idle();
        let disarmed = self.lock_sync().disarm_others(entity_id);

        let interpolator = self.tracks.interpolator();
        let pose = track
            .sample_at(self.scene.now(), interpolator.as_ref())
            .or_else(|| track.sample_at(track.availability().start, interpolator.as_ref()))
            .unwrap_or_else(|| Pose::new(Vector3::zeros()));

        let proxy = self.proxy_for(entity_id, &pose);
        let sync = Arc::clone(&self.sync);
        let events = self.events.clone();
        let focused = entity_id.clone();
        let on_complete = move || {
            if let Some(proxy) = proxy {
                sync.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .arm(track, proxy);
            }
            let _ = events.send(ViewerEvent::EntityFocused(focused));
        };

        let ticket = self.camera.fly_to(
            FlyTarget::BoundingSphere {
                center: pose.position,
                radius: self.config.entity_radius,
            },
            on_complete,
        );
        self.selection = Some(Selection::Entity(entity_id.clone()));
        info!(
            "Selected {} (flight {}, disarmed {})",
            entity_id, ticket.0, disarmed
        );
        Ok(ticket)
    }

    /// Focuses a landmark, disarming every entity.
    pub fn on_landmark_selected(&mut self, landmark_id: &str) -> Result<FlightTicket, ViewerError> {
        self.ensure_live()?;
        let landmark = self
            .landmarks
            .get(landmark_id)
            .cloned()
            .ok_or_else(|| ViewerError::UnknownLandmark(landmark_id.to_string()))?;

        self.dispose_idle();
        self.lock_sync().disarm_all();

        let events = self.events.clone();
        let focused = landmark.id.clone();
        let ticket = self.camera.fly_to(
            FlyTarget::BoundingSphere {
                center: landmark.position,
                radius: landmark.radius,
            },
            move || {
                let _ = events.send(ViewerEvent::LandmarkFocused(focused));
            },
        );
        self.selection = Some(Selection::Landmark(landmark.id.clone()));
        info!("Selected landmark {} (flight {})", landmark.name, ticket.0);
        Ok(ticket)
    }

    /// Returns to the home view immediately, disarming everything.
    pub fn on_reset(&mut self) {
        self.dispose_idle();
        let disarmed = self.lock_sync().disarm_all();
        self.camera.reset();
        self.selection = None;
        let _ = self.events.send(ViewerEvent::Reset);
        info!("Viewer reset (disarmed {})", disarmed);
    }

    /// Any user interaction stops the idle rotation.
    pub fn on_user_input(&mut self) {
        self.dispose_idle();
    }

    /// Display label ("Sol N") for an entity at `time`.
    pub fn time_to_label(&self, entity_id: &EntityId, time: Timestamp) -> Result<String, ViewerError> {
        Ok(self.tracks.time_to_label(entity_id, time)?)
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Releases everything the viewer registered. Idempotent.
    pub fn teardown(&mut self) {
        if self.status == ViewerStatus::TornDown {
            return;
        }

        self.dispose_idle();
        self.lock_sync().disarm_all();
        self.camera.reset();
        if let Some(id) = self.sync_callback.take() {
            self.scene.unregister_per_frame_callback(id);
        }
        for (_, entry) in self.proxies.drain() {
            self.scene.remove_entity(entry.handle);
        }

        self.cache.clear();
        self.tracks.clear();
        self.models.clear();
        self.landmarks.clear();
        self.selection = None;
        self.status = ViewerStatus::TornDown;
        info!("Viewer torn down");
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn status(&self) -> ViewerStatus {
        self.status
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn scene(&self) -> &Arc<S> {
        &self.scene
    }

    pub fn tracks(&self) -> &TrackModel {
        &self.tracks
    }

    pub fn landmarks(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.values()
    }

    pub fn has_model(&self, entity_id: &EntityId) -> bool {
        self.models.contains_key(entity_id)
    }

    pub fn proxy(&self, entity_id: &EntityId) -> Option<&VisualProxy> {
        self.proxies.get(entity_id).map(|entry| &entry.proxy)
    }

    pub fn is_armed(&self, entity_id: &EntityId) -> bool {
        self.lock_sync().is_armed(entity_id)
    }

    pub fn armed_entities(&self) -> Vec<EntityId> {
        self.lock_sync().armed_ids()
    }

    pub fn camera_state(&self) -> CameraState {
        self.camera.state()
    }

    pub fn is_idle_rotating(&self) -> bool {
        self.idle.as_ref().is_some_and(IdleRotationGuard::is_active)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn ensure_live(&self) -> Result<(), ViewerError> {
        if self.status == ViewerStatus::TornDown {
            return Err(ViewerError::TornDown);
        }
        Ok(())
    }

    fn lock_sync(&self) -> MutexGuard<'_, Synchronizer> {
        self.sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispose_idle(&mut self) {
        if let Some(mut guard) = self.idle.take() {
            guard.dispose();
        }
    }

    /// Returns the entity's proxy, creating it on first use.
    fn proxy_for(&mut self, entity_id: &EntityId, pose: &Pose) -> Option<VisualProxy> {
        if let Some(entry) = self.proxies.get(entity_id) {
            return Some(entry.proxy.clone());
        }

        let Some(model) = self.models.get(entity_id) else {
            warn!("No model loaded for {}; it will not be animated", entity_id);
            return None;
        };

        let proxy = VisualProxy::new(entity_id.clone(), *pose);
        match self.scene.add_entity(proxy.entity_spec(model.clone())) {
            Ok(handle) => {
                debug!("Created proxy for {}", entity_id);
                self.proxies.insert(
                    entity_id.clone(),
                    ProxyEntry {
                        proxy: proxy.clone(),
                        handle,
                    },
                );
                Some(proxy)
            }
            Err(e) => {
                warn!("Scene rejected proxy for {}: {}", entity_id, e);
                None
            }
        }
    }
}

impl<S, F, C> Drop for Viewer<S, F, C>
where
    S: Scene,
    F: AssetFetcher,
    C: TraverseContext,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

// ============================================================================
// STAGE SINK
// ============================================================================

/// Registers loaded payloads with the viewer's state.
struct ViewerSink<'a, S: Scene> {
    scene: &'a Arc<S>,
    config: &'a ViewerConfig,
    tracks: &'a mut TrackModel,
    models: &'a mut HashMap<EntityId, ModelRef>,
    landmarks: &'a mut BTreeMap<String, Landmark>,
    idle: &'a mut Option<IdleRotationGuard<S>>,
    events: &'a mpsc::UnboundedSender<ViewerEvent>,
}

impl<S: Scene> StageSink for ViewerSink<'_, S> {
    fn apply_asset(
        &mut self,
        kind: StageKind,
        asset: &AssetRequest,
        payload: AssetPayload,
    ) -> Result<(), AssetError> {
        match kind {
            StageKind::Terrain => {
                self.scene
                    .load_terrain(&asset.key, &payload)
                    .map_err(AssetError::Scene)?;
            }
            StageKind::Models => {
                let entity_id = asset.entity_id.clone().ok_or_else(|| {
                    AssetError::Rejected(format!("model {} names no entity", asset.key))
                })?;
                let data = payload.as_bytes().ok_or_else(|| {
                    AssetError::Rejected(format!("model {} is not binary", asset.key))
                })?;
                self.models.insert(
                    entity_id,
                    ModelRef {
                        key: asset.key.clone(),
                        data: Arc::from(data),
                    },
                );
            }
            StageKind::Trajectories => {
                let doc = payload_json(&asset.key, &payload)?;
                for track in decode_trajectory_document(&doc)? {
                    debug!("Loaded track {}", track.entity_id());
                    self.tracks.insert(track);
                }
            }
            StageKind::Landmarks => {
                let doc = payload_json(&asset.key, &payload)?;
                for landmark in decode_landmark_collection(&doc, self.config.landmark_radius)? {
                    self.landmarks.insert(landmark.id.clone(), landmark);
                }
            }
            StageKind::Finalizing => {}
        }
        Ok(())
    }

    fn finalize(&mut self) {
        if self.config.rotate_on_idle && self.idle.is_none() {
            *self.idle = Some(IdleRotation::start(self.scene, self.config.idle_rotation));
        }
        let _ = self.events.send(ViewerEvent::InstructionsReady);
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors surfaced to the viewer's caller.
#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("Scene failed to initialize: {0}")]
    SceneInitialization(EnvError),

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("Unknown landmark: {0}")]
    UnknownLandmark(String),

    #[error("No preload planned")]
    NothingPlanned,

    #[error("Viewer has been torn down")]
    TornDown,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Track(#[from] TrackError),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AssetSpec, ModelSpec, MODELS_STAGE};
    use crate::testing::{MapFetcher, TestScene};
    use crate::traverse_pipeline::FINALIZING_STAGE;
    use approx::assert_relative_eq;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use traverse_env::TokioContext;

    type TestViewer = Viewer<TestScene, MapFetcher, TokioContext>;

    fn fetcher() -> MapFetcher {
        let mut fetcher = MapFetcher::default();
        fetcher.insert("terrain.bin", AssetPayload::bytes(vec![1u8; 64]));
        fetcher.insert("a.glb", AssetPayload::bytes(b"glTF-a".to_vec()));
        fetcher.insert("b.glb", AssetPayload::bytes(b"glTF-b".to_vec()));
        fetcher.insert(
            "traverse.czml",
            AssetPayload::Json(json!([
                { "id": "document" },
                {
                    "id": "rover-a",
                    "availability": [0.0, 100.0],
                    "position": { "cartesian": [0.0, 0.0, 0.0, 0.0, 100.0, 100.0, 0.0, 0.0] },
                    "solOrigin": { "startTime": 0.0, "startIndex": 10 }
                },
                {
                    "id": "rover-b",
                    "availability": [0.0, 100.0],
                    "position": { "cartesian": [0.0, 0.0, 50.0, 0.0, 100.0, 0.0, 150.0, 0.0] }
                }
            ])),
        );
        fetcher.insert(
            "sites.geojson",
            AssetPayload::Json(json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": { "id": "crater", "name": "Crater Rim", "radius": 40.0 },
                    "geometry": { "type": "Point", "coordinates": [500.0, 500.0, 10.0] }
                }]
            })),
        );
        fetcher
    }

    fn manifest() -> PreloadManifest {
        let asset = |key: &str, url: &str| AssetSpec {
            key: key.to_string(),
            url: url.to_string(),
        };
        let model = |id: &str, url: &str| ModelSpec {
            entity_id: EntityId::new(id),
            key: None,
            url: url.to_string(),
        };
        PreloadManifest {
            terrain: vec![asset("terrain", "terrain.bin")],
            models: vec![model("rover-a", "a.glb"), model("rover-b", "b.glb")],
            trajectories: vec![asset("traverse", "traverse.czml")],
            landmarks: vec![asset("sites", "sites.geojson")],
            ..PreloadManifest::default()
        }
    }

    fn mount(fetcher: MapFetcher) -> (TestViewer, mpsc::UnboundedReceiver<ViewerEvent>) {
        Viewer::mount(
            TokioContext::shared(),
            Arc::new(fetcher),
            ViewerConfig::default(),
            || Ok(TestScene::default()),
        )
        .unwrap()
    }

    async fn loaded(fetcher: MapFetcher) -> (TestViewer, mpsc::UnboundedReceiver<ViewerEvent>) {
        let (mut viewer, rx) = mount(fetcher);
        viewer.preload(&manifest()).await.unwrap();
        (viewer, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ViewerEvent>) -> Vec<ViewerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn id(name: &str) -> EntityId {
        EntityId::new(name)
    }

    #[test]
    fn test_scene_failure_is_fatal() {
        let result: Result<(TestViewer, _), _> = Viewer::mount(
            TokioContext::shared(),
            Arc::new(MapFetcher::default()),
            ViewerConfig::default(),
            || Err(EnvError::scene("no GPU")),
        );
        assert!(matches!(result, Err(ViewerError::SceneInitialization(_))));
    }

    #[tokio::test]
    async fn test_preload_loads_everything() {
        let (mut viewer, mut rx) = mount(fetcher());
        assert_eq!(viewer.status(), ViewerStatus::Mounted);

        let report = viewer.preload(&manifest()).await.unwrap();

        assert_eq!(report.progress, 100);
        assert_eq!(viewer.progress(), 100);
        assert_eq!(viewer.current_stage_name(), FINALIZING_STAGE);
        assert_eq!(viewer.status(), ViewerStatus::Ready);
        assert_eq!(viewer.tracks().entity_ids(), vec![id("rover-a"), id("rover-b")]);
        assert!(viewer.has_model(&id("rover-a")));
        assert_eq!(viewer.landmarks().count(), 1);
        assert_eq!(viewer.scene().terrain_keys(), vec!["terrain".to_string()]);
        assert!(viewer.is_idle_rotating());
        assert_eq!(drain(&mut rx), vec![ViewerEvent::InstructionsReady]);
    }

    #[tokio::test]
    async fn test_progress_stream_during_preload() {
        let (mut viewer, _rx) = mount(fetcher());
        let monitor = viewer.plan_preload(&manifest()).unwrap();
        let (tx, mut updates) = progress_channel();

        viewer.run_preload(tx).await.unwrap();

        let mut seen = Vec::new();
        while let Some(update) = updates.recv().await {
            seen.push(update);
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(seen.last().unwrap().overall_progress, 100);
        assert!(seen.windows(2).all(|w| w[0].overall_progress <= w[1].overall_progress));
        assert_eq!(monitor.progress(), 100);
    }

    #[tokio::test]
    async fn test_selection_arms_on_arrival() {
        let (mut viewer, mut rx) = loaded(fetcher()).await;
        drain(&mut rx);

        viewer.on_entity_selected(&id("rover-a")).unwrap();
        assert!(!viewer.is_idle_rotating());
        assert_eq!(viewer.camera_state(), CameraState::Transitioning);
        assert!(!viewer.is_armed(&id("rover-a")));

        assert!(viewer.scene().complete_flight());
        assert!(viewer.is_armed(&id("rover-a")));
        assert_eq!(drain(&mut rx), vec![ViewerEvent::EntityFocused(id("rover-a"))]);

        viewer.scene().set_time(50.0);
        viewer.scene().frame(1.0 / 60.0);
        let (pose, visible) = viewer.scene().draw("rover-a").unwrap();
        assert!(visible);
        assert_relative_eq!(pose.position, Vector3::new(50.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[tokio::test]
    async fn test_selecting_another_entity_disarms_previous() {
        let (mut viewer, _rx) = loaded(fetcher()).await;

        viewer.on_entity_selected(&id("rover-a")).unwrap();
        viewer.scene().complete_flight();
        viewer.on_entity_selected(&id("rover-b")).unwrap();

        // Disarmed at selection time, before the flight lands
        assert_eq!(viewer.armed_entities(), Vec::<EntityId>::new());
        assert!(!viewer.proxy(&id("rover-a")).unwrap().is_visible());

        viewer.scene().complete_flight();
        assert_eq!(viewer.armed_entities(), vec![id("rover-b")]);

        // Reselecting reuses the existing proxy
        viewer.on_entity_selected(&id("rover-a")).unwrap();
        viewer.scene().complete_flight();
        assert_eq!(viewer.scene().entity_count(), 2);
        assert!(viewer.proxy(&id("rover-a")).unwrap().is_visible());
    }

    #[tokio::test]
    async fn test_superseded_selection_never_arms() {
        let (mut viewer, mut rx) = loaded(fetcher()).await;
        drain(&mut rx);

        viewer.on_entity_selected(&id("rover-a")).unwrap();
        viewer.on_entity_selected(&id("rover-b")).unwrap();
        viewer.scene().complete_flight();

        assert_eq!(viewer.armed_entities(), vec![id("rover-b")]);
        assert_eq!(drain(&mut rx), vec![ViewerEvent::EntityFocused(id("rover-b"))]);
    }

    #[tokio::test]
    async fn test_missing_model_degrades_gracefully() {
        let mut fetcher = fetcher();
        fetcher.fail("b.glb");
        let (mut viewer, mut rx) = mount(fetcher);

        let report = viewer.preload(&manifest()).await.unwrap();
        assert_eq!(report.progress, 100);
        let models = report.stages.iter().find(|s| s.name == MODELS_STAGE).unwrap();
        assert_eq!(models.failed, 1);
        drain(&mut rx);

        viewer.on_entity_selected(&id("rover-b")).unwrap();
        viewer.scene().complete_flight();

        assert!(!viewer.is_armed(&id("rover-b")));
        assert!(viewer.proxy(&id("rover-b")).is_none());
        assert_eq!(viewer.scene().entity_count(), 0);
        assert_eq!(drain(&mut rx), vec![ViewerEvent::EntityFocused(id("rover-b"))]);
    }

    #[tokio::test]
    async fn test_landmark_selection_disarms_all() {
        let (mut viewer, mut rx) = loaded(fetcher()).await;
        viewer.on_entity_selected(&id("rover-a")).unwrap();
        viewer.scene().complete_flight();
        drain(&mut rx);

        viewer.on_landmark_selected("crater").unwrap();
        assert!(viewer.armed_entities().is_empty());

        let destination = viewer.scene().flight_destination().unwrap();
        let center = Vector3::new(500.0, 500.0, 10.0);
        assert_relative_eq!((destination.position - center).norm(), 120.0, epsilon = 1e-9);

        viewer.scene().complete_flight();
        assert_eq!(drain(&mut rx), vec![ViewerEvent::LandmarkFocused("crater".to_string())]);
        assert_eq!(viewer.selection(), Some(&Selection::Landmark("crater".to_string())));

        assert!(matches!(
            viewer.on_landmark_selected("nowhere"),
            Err(ViewerError::UnknownLandmark(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_recovers_mid_flight() {
        let (mut viewer, mut rx) = loaded(fetcher()).await;
        viewer.on_entity_selected(&id("rover-a")).unwrap();
        viewer.scene().complete_flight();
        viewer.on_entity_selected(&id("rover-b")).unwrap();
        drain(&mut rx);

        viewer.on_reset();

        assert!(viewer.armed_entities().is_empty());
        assert_eq!(viewer.camera_state(), CameraState::Idle);
        assert_eq!(viewer.scene().camera_view(), ViewerConfig::default().camera.home);
        assert!(viewer.selection().is_none());
        // The cancelled flight can no longer land
        assert!(!viewer.scene().complete_flight());
        assert_eq!(drain(&mut rx), vec![ViewerEvent::Reset]);
    }

    #[tokio::test]
    async fn test_user_input_stops_idle_rotation() {
        let (mut viewer, _rx) = loaded(fetcher()).await;
        assert_eq!(viewer.scene().callback_count(), 2);

        viewer.on_user_input();
        assert!(!viewer.is_idle_rotating());
        assert_eq!(viewer.scene().callback_count(), 1);
    }

    #[tokio::test]
    async fn test_time_to_label() {
        let (viewer, _rx) = loaded(fetcher()).await;
        assert_eq!(viewer.time_to_label(&id("rover-a"), 0.0).unwrap(), "Sol 10");
        assert_eq!(viewer.time_to_label(&id("rover-b"), 0.0).unwrap(), "Sol 0");
        assert!(matches!(
            viewer.time_to_label(&id("ghost"), 0.0),
            Err(ViewerError::Track(TrackError::UnknownEntity(_)))
        ));
    }

    #[tokio::test]
    async fn test_second_preload_hits_cache() {
        let (mut viewer, _rx) = loaded(fetcher()).await;
        let first = viewer.cache_stats();

        let report = viewer.preload(&manifest()).await.unwrap();
        assert_eq!(report.fetched(), 0);
        assert_eq!(viewer.cache_stats().hits, first.hits + 5);
    }

    #[tokio::test]
    async fn test_rejected_trajectory_refetched_on_next_preload() {
        let mut bad = fetcher();
        bad.insert(
            "traverse.czml",
            AssetPayload::Json(json!([{
                "id": "rover-a",
                "position": {
                    "cartesian": [0.0, 0.0, 0.0, 0.0, 50.0, 1.0, 0.0, 0.0, 20.0, 2.0, 0.0, 0.0]
                }
            }])),
        );
        let fetcher = Arc::new(bad);
        let (mut viewer, _rx): (TestViewer, _) = Viewer::mount(
            TokioContext::shared(),
            Arc::clone(&fetcher),
            ViewerConfig::default(),
            || Ok(TestScene::default()),
        )
        .unwrap();

        let first = viewer.preload(&manifest()).await.unwrap();
        assert_eq!(first.fetched(), 5);
        assert_eq!(first.failed(), 1);
        assert!(viewer.tracks().is_empty());
        assert!(!viewer.cache().contains("traverse"));

        let second = viewer.preload(&manifest()).await.unwrap();
        assert_eq!(second.fetched(), 1);
        assert_eq!(second.failed(), 1);
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let (mut viewer, _rx) = loaded(fetcher()).await;
        viewer.on_entity_selected(&id("rover-a")).unwrap();
        viewer.scene().complete_flight();

        viewer.teardown();
        viewer.teardown();

        assert_eq!(viewer.status(), ViewerStatus::TornDown);
        assert_eq!(viewer.scene().callback_count(), 0);
        assert_eq!(viewer.scene().entity_count(), 0);
        assert!(viewer.cache().is_empty());
        assert!(viewer.tracks().is_empty());
        assert!(matches!(
            viewer.on_entity_selected(&id("rover-a")),
            Err(ViewerError::TornDown)
        ));
    }

    #[tokio::test]
    async fn test_fetches_counted_once_per_asset() {
        let fetcher = Arc::new(fetcher());
        let (mut viewer, _rx): (TestViewer, _) = Viewer::mount(
            TokioContext::shared(),
            Arc::clone(&fetcher),
            ViewerConfig::default(),
            || Ok(TestScene::default()),
        )
        .unwrap();
        viewer.preload(&manifest()).await.unwrap();
        assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 5);
    }
}
