//! Scenario runner - executes playback scenarios against a headless scene.

use crate::context::SimContext;
use crate::exporter::{EntityPosition, SimEvent, SimExport, SimFrame};
use crate::fetcher::SimFetcher;
use crate::oracle::{model_url, MissionConfig, MissionOracle, SyntheticMission};
use crate::scenarios::ScenarioId;
use crate::scene::{RenderedEntity, SimScene, SimSceneConfig};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use traverse_core::traverse_cache::CacheConfig;
use traverse_core::traverse_pipeline::PipelineReport;
use traverse_core::{
    CameraState, LinearInterpolator, PreloadManifest, Viewer, ViewerConfig, ViewerError,
    ViewerEvent, ViewerStatus,
};
use traverse_env::{EntityId, EnvError, FetchController, FrameInfo, Pose, Scene, Timestamp};

type SimViewer = Viewer<SimScene, SimFetcher, SimContext>;

/// Rendered positions closer than this are considered identical (meters).
const POSITION_TOLERANCE: f64 = 1e-6;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total frames rendered
    pub total_frames: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioMetrics {
    /// Fetches issued to the asset source
    pub assets_fetched: u64,

    /// Assets that failed during the last preload
    pub assets_failed: u64,

    /// Cache lookups served from memory
    pub cache_hits: u64,

    /// Cache writes refused by the quota
    pub cache_write_failures: u64,

    /// Preload progress at the end of the run
    pub final_progress: u8,

    /// Camera flights that landed
    pub flights_completed: u64,

    /// Viewer events observed
    pub events: u64,
}

/// Runs playback scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Frame rate in Hz
    frame_rate_hz: u32,

    /// Simulation seconds per wall-clock second
    time_multiplier: f64,

    /// Maximum wall-clock duration in seconds
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            frame_rate_hz: 60,
            time_multiplier: 600.0,
            max_duration_secs: 30.0,
        }
    }

    /// Sets the frame rate.
    pub fn with_frame_rate(mut self, hz: u32) -> Self {
        self.frame_rate_hz = hz;
        self
    }

    /// Sets the clock multiplier.
    pub fn with_time_multiplier(mut self, multiplier: f64) -> Self {
        self.time_multiplier = multiplier;
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Frame budget for one scenario.
    fn max_frames(&self) -> u64 {
        (self.max_duration_secs * f64::from(self.frame_rate_hz)).max(1.0) as u64
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None).0
    }

    /// Runs a scenario, recording every `interval`-th frame.
    pub fn run_recorded(&self, scenario: ScenarioId, interval: u64) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, Some(interval.max(1)));
        let export = export.unwrap_or_else(|| {
            let mut empty = SimExport::new(scenario.name(), self.seed);
            empty.finalize(result.passed, result.failure_reason.clone());
            empty
        });
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, record: Option<u64>) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                return (
                    self.failed(scenario, format!("Failed to build runtime: {e}")),
                    None,
                )
            }
        };

        runtime.block_on(async {
            match scenario {
                ScenarioId::SceneFailure => (self.run_scene_failure(), None),
                _ => self.run_playback(scenario, record).await,
            }
        })
    }

    fn failed(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_frames: 0,
            final_time_secs: 0.0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }

    fn scene_config(&self, mission: &SyntheticMission) -> SimSceneConfig {
        SimSceneConfig {
            frame_rate_hz: self.frame_rate_hz,
            time_multiplier: self.time_multiplier,
            start_time: mission.start_time(),
        }
    }

    fn generate_mission(&self) -> Result<SyntheticMission, String> {
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        MissionOracle::new(physics_seed)
            .generate_mission(&MissionConfig::default())
            .map_err(|e| format!("Mission generation failed: {e}"))
    }

    async fn run_playback(
        &self,
        scenario: ScenarioId,
        record: Option<u64>,
    ) -> (ScenarioResult, Option<SimExport>) {
        let export = record.map(|interval| (SimExport::new(scenario.name(), self.seed), interval));
        let mut harness = match Harness::new(self, ViewerConfig::default(), export) {
            Ok(harness) => harness,
            Err(reason) => return (self.failed(scenario, reason), None),
        };

        let outcome = match scenario {
            ScenarioId::Nominal => self.run_nominal(&mut harness).await,
            ScenarioId::MissingModel => self.run_missing_model(&mut harness).await,
            ScenarioId::FlightSupersession => self.run_flight_supersession(&mut harness).await,
            ScenarioId::CacheReload => self.run_cache_reload(&mut harness).await,
            ScenarioId::ClockPause => self.run_clock_pause(&mut harness).await,
            ScenarioId::OutOfRange => self.run_out_of_range(&mut harness).await,
            ScenarioId::SceneFailure => Err("scene failure runs without a harness".to_string()),
        };

        let scene = harness.viewer.scene();
        let total_frames = scene.frame();
        let final_time_secs = scene.now();
        let metrics = harness.metrics();
        let failure_reason = outcome.err();
        let passed = failure_reason.is_none();

        if let Some(reason) = &failure_reason {
            warn!("{} failed: {}", scenario.name(), reason);
        }

        let export = harness.export.take().map(|(mut export, _)| {
            export.finalize(passed, failure_reason.clone());
            export
        });

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_frames,
            final_time_secs,
            failure_reason,
            metrics,
        };
        (result, export)
    }

    /// PLAY-001: Nominal - preload, select, follow.
    ///
    /// **Assertion**: progress reaches 100, the selected rover is the only
    /// armed entity and its rendered pose equals the ground-truth sample at
    /// the scene clock.
    async fn run_nominal(&self, h: &mut Harness) -> Result<(), String> {
        info!("PLAY-001: Nominal playback");

        let report = h.preload().await?;
        check(report.progress == 100, || format!("progress stalled at {}%", report.progress))?;
        check(h.viewer.status() == ViewerStatus::Ready, || {
            format!("viewer is {:?} after preload", h.viewer.status())
        })?;
        check(h.viewer.is_idle_rotating(), || "idle rotation did not start".into())?;
        check(h.saw(&ViewerEvent::InstructionsReady), || "instructions were never offered".into())?;

        h.step_frames(10);
        let rover = h.rover(0)?;
        h.select(&rover)?;
        check(!h.viewer.is_idle_rotating(), || "selection did not stop idle rotation".into())?;

        let landed_after = h.step_until_idle(self.max_frames())?;
        debug!("Flight landed after {} frames", landed_after);
        check(h.viewer.armed_entities() == vec![rover.clone()], || {
            format!("armed set is {:?}", h.viewer.armed_entities())
        })?;
        check(h.saw(&ViewerEvent::EntityFocused(rover.clone())), || "no focus event".into())?;

        for _ in 0..30 {
            h.step();
            h.assert_tracking(&rover)?;
        }

        let now = h.viewer.scene().now();
        let label = h.viewer.time_to_label(&rover, now).map_err(|e| e.to_string())?;
        check(label.starts_with("Sol "), || format!("unexpected label {label}"))?;
        Ok(())
    }

    /// PLAY-002: MissingModel - one vehicle model rejects.
    ///
    /// **Assertion**: progress still reaches 100; the vehicle without a model
    /// gets a camera flight but no proxy.
    async fn run_missing_model(&self, h: &mut Harness) -> Result<(), String> {
        info!("PLAY-002: Missing vehicle model");

        let broken = h.rover(1)?;
        h.fetcher.fail_url(&model_url(&broken));

        let report = h.preload().await?;
        check(report.failed() == 1, || format!("{} assets failed, expected 1", report.failed()))?;
        check(report.progress == 100, || format!("progress stalled at {}%", report.progress))?;
        check(!h.viewer.has_model(&broken), || "broken model was registered".into())?;

        h.select(&broken)?;
        h.step_until_idle(self.max_frames())?;
        check(h.saw(&ViewerEvent::EntityFocused(broken.clone())), || {
            "camera never arrived at the vehicle without a model".into()
        })?;
        check(h.viewer.armed_entities().is_empty(), || {
            format!("armed set is {:?}", h.viewer.armed_entities())
        })?;
        check(h.rendered(&broken).is_none(), || "a proxy was drawn without a model".into())?;

        let healthy = h.rover(0)?;
        h.select(&healthy)?;
        h.step_until_idle(self.max_frames())?;
        h.step();
        h.assert_tracking(&healthy)?;
        Ok(())
    }

    /// PLAY-003: FlightSupersession - second selection mid-flight.
    ///
    /// **Assertion**: only the second target is armed and focused; the first
    /// flight's completion never runs.
    async fn run_flight_supersession(&self, h: &mut Harness) -> Result<(), String> {
        info!("PLAY-003: Flight supersession");

        h.preload().await?;
        let first = h.rover(0)?;
        let second = h.rover(1)?;

        h.select(&first)?;
        h.step_frames(30);
        check(h.viewer.camera_state() == CameraState::Transitioning, || {
            "first flight landed before it could be superseded".into()
        })?;

        h.select(&second)?;
        h.step_until_idle(self.max_frames())?;
        // Linger so a stale completion would have had every chance to run
        h.step_frames(30);

        check(h.viewer.armed_entities() == vec![second.clone()], || {
            format!("armed set is {:?}", h.viewer.armed_entities())
        })?;
        check(!h.saw(&ViewerEvent::EntityFocused(first.clone())), || {
            "superseded flight reported arrival".into()
        })?;
        check(h.saw(&ViewerEvent::EntityFocused(second.clone())), || "no focus event".into())?;
        let landed = h.viewer.scene().flights_completed();
        check(landed == 1, || format!("{landed} flights landed, expected 1"))?;
        Ok(())
    }

    /// PLAY-004: CacheReload - warm cache and a tight quota.
    ///
    /// **Assertion**: a second preload issues no fetches; a viewer whose
    /// cache refuses writes still reaches 100%.
    async fn run_cache_reload(&self, h: &mut Harness) -> Result<(), String> {
        info!("PLAY-004: Cache reload");

        h.preload().await?;
        let cold = h.fetcher.fetch_count();
        let assets = h.manifest.stages().iter().map(|s| s.assets.len()).sum::<usize>() as u64;
        check(cold == assets, || format!("cold preload fetched {cold}, expected {assets}"))?;

        let report = h.preload().await?;
        let warm = h.fetcher.fetch_count() - cold;
        check(warm == 0, || format!("warm preload fetched {warm} assets"))?;
        check(report.progress == 100, || format!("warm preload stalled at {}%", report.progress))?;
        check(h.viewer.cache_stats().hits >= assets, || {
            format!("only {} cache hits", h.viewer.cache_stats().hits)
        })?;

        let tight = ViewerConfig {
            cache: CacheConfig {
                max_bytes: Some(1024),
            },
            ..ViewerConfig::default()
        };
        let mut constrained = Harness::new(self, tight, None)?;
        let report = constrained.preload().await?;
        check(report.progress == 100, || format!("quota run stalled at {}%", report.progress))?;
        let refused = constrained.viewer.cache_stats().failed_writes;
        check(refused > 0, || "quota never refused a write".into())?;
        Ok(())
    }

    /// PLAY-005: ClockPause - frozen clock keeps proxies in place.
    ///
    /// **Assertion**: while paused the rendered pose is unchanged, even when
    /// the clock is moved by hand; after resuming it moves again.
    async fn run_clock_pause(&self, h: &mut Harness) -> Result<(), String> {
        info!("PLAY-005: Clock pause");

        h.preload().await?;
        let rover = h.rover(0)?;
        h.select(&rover)?;
        h.step_until_idle(self.max_frames())?;
        h.step();

        let scene = Arc::clone(h.viewer.scene());
        scene.set_animating(false);
        h.step();
        let frozen_at = scene.now();
        let frozen = h.rendered(&rover).ok_or("rover not drawn")?;

        h.step_frames(60);
        check(scene.now() == frozen_at, || "clock moved while paused".into())?;
        let still = h.rendered(&rover).ok_or("rover not drawn")?;
        check(same_position(&frozen, &still), || "proxy moved while paused".into())?;

        // Scrubbing a paused clock must not drag the proxy along
        scene.set_time(frozen_at + 60.0);
        h.step();
        let scrubbed = h.rendered(&rover).ok_or("rover not drawn")?;
        check(same_position(&frozen, &scrubbed), || {
            "proxy followed a scrubbed clock while paused".into()
        })?;
        scene.set_time(frozen_at);

        scene.set_animating(true);
        h.step_frames(10);
        let moved = h.rendered(&rover).ok_or("rover not drawn")?;
        check(!same_position(&frozen, &moved), || "proxy did not resume".into())?;
        h.assert_tracking(&rover)?;
        Ok(())
    }

    /// PLAY-006: OutOfRange - clock outside a track's availability.
    ///
    /// **Assertion**: the proxy hides and keeps its last pose outside the
    /// interval, and reappears tracking the truth once back inside.
    async fn run_out_of_range(&self, h: &mut Harness) -> Result<(), String> {
        info!("PLAY-006: Out of range");

        h.preload().await?;
        let late = h.rover(1)?;
        let availability = h
            .mission
            .track(&late)
            .map(|t| t.availability())
            .ok_or("late rover has no track")?;

        h.select(&late)?;
        h.step_until_idle(self.max_frames())?;
        check(h.viewer.is_armed(&late), || "late rover not armed".into())?;
        check(h.viewer.scene().now() < availability.start, || {
            "scenario needs the clock before the late rover's start".into()
        })?;
        let before = h.rendered(&late).ok_or("late rover not drawn")?;
        check(!before.visible, || "proxy visible before its track starts".into())?;

        let scene = Arc::clone(h.viewer.scene());
        scene.set_time(availability.start + 1_000.0);
        h.step();
        let inside = h.rendered(&late).ok_or("late rover not drawn")?;
        check(inside.visible, || "proxy hidden inside availability".into())?;
        h.assert_tracking(&late)?;

        scene.set_time(availability.stop + 5_000.0);
        h.step();
        let after = h.rendered(&late).ok_or("late rover not drawn")?;
        check(!after.visible, || "proxy visible after its track ended".into())?;
        check(same_position(&inside, &after), || "proxy moved while unavailable".into())?;
        Ok(())
    }

    /// PLAY-007: SceneFailure - the scene cannot be created.
    ///
    /// **Assertion**: mount reports a fatal scene error and nothing is fetched.
    fn run_scene_failure(&self) -> ScenarioResult {
        info!("PLAY-007: Scene failure");

        let ctx = SimContext::shared(self.seed);
        let fetcher = Arc::new(SimFetcher::new(Arc::clone(&ctx)));
        let mounted: Result<(SimViewer, _), ViewerError> =
            Viewer::mount(ctx, Arc::clone(&fetcher), ViewerConfig::default(), || {
                Err(EnvError::scene("no rendering context available"))
            });

        let failure_reason = match mounted {
            Err(ViewerError::SceneInitialization(_)) if fetcher.fetch_count() == 0 => None,
            Err(ViewerError::SceneInitialization(_)) => Some("assets fetched without a scene".into()),
            Err(e) => Some(format!("unexpected error: {e}")),
            Ok(_) => Some("viewer mounted without a scene".into()),
        };

        ScenarioResult {
            scenario: ScenarioId::SceneFailure,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_frames: 0,
            final_time_secs: 0.0,
            failure_reason,
            metrics: ScenarioMetrics {
                assets_fetched: fetcher.fetch_count(),
                ..ScenarioMetrics::default()
            },
        }
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// One mounted viewer over a generated mission.
struct Harness {
    fetcher: Arc<SimFetcher>,
    mission: SyntheticMission,
    manifest: PreloadManifest,
    viewer: SimViewer,
    events: mpsc::UnboundedReceiver<ViewerEvent>,
    seen: Vec<ViewerEvent>,
    pending: Vec<SimEvent>,
    last_report: Option<PipelineReport>,
    export: Option<(SimExport, u64)>,
}

impl Harness {
    fn new(
        runner: &ScenarioRunner,
        config: ViewerConfig,
        export: Option<(SimExport, u64)>,
    ) -> Result<Self, String> {
        let ctx = SimContext::shared(runner.seed);
        let mission = runner.generate_mission()?;
        let fetcher = Arc::new(SimFetcher::new(Arc::clone(&ctx)));
        let manifest = mission.install(&fetcher);

        let scene_config = runner.scene_config(&mission);
        let (viewer, events) = Viewer::mount(ctx, Arc::clone(&fetcher), config, || {
            SimScene::new(scene_config).map_err(|e| EnvError::scene(e.to_string()))
        })
        .map_err(|e| format!("Mount failed: {e}"))?;

        Ok(Self {
            fetcher,
            mission,
            manifest,
            viewer,
            events,
            seen: Vec::new(),
            pending: Vec::new(),
            last_report: None,
            export,
        })
    }

    async fn preload(&mut self) -> Result<PipelineReport, String> {
        let report = self
            .viewer
            .preload(&self.manifest)
            .await
            .map_err(|e| format!("Preload failed: {e}"))?;
        self.drain_events();
        self.last_report = Some(report.clone());
        Ok(report)
    }

    fn rover(&self, index: usize) -> Result<EntityId, String> {
        self.mission
            .rover_ids()
            .get(index)
            .cloned()
            .ok_or_else(|| format!("mission has no rover #{index}"))
    }

    fn select(&mut self, entity_id: &EntityId) -> Result<(), String> {
        self.viewer
            .on_entity_selected(entity_id)
            .map(|_| ())
            .map_err(|e| format!("Selecting {entity_id} failed: {e}"))
    }

    fn step(&mut self) -> FrameInfo {
        let info = self.viewer.scene().step();
        self.drain_events();
        self.record(&info);
        info
    }

    fn step_frames(&mut self, frames: u64) {
        for _ in 0..frames {
            self.step();
        }
    }

    /// Steps until the camera is idle; returns the frames it took.
    fn step_until_idle(&mut self, max_frames: u64) -> Result<u64, String> {
        let mut frames = 0;
        while self.viewer.camera_state() == CameraState::Transitioning {
            if frames >= max_frames {
                return Err(format!("camera still moving after {max_frames} frames"));
            }
            self.step();
            frames += 1;
        }
        Ok(frames)
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            debug!("Viewer event: {:?}", event);
            self.pending.push(SimEvent::info(format!("{event:?}")));
            self.seen.push(event);
        }
    }

    fn saw(&self, event: &ViewerEvent) -> bool {
        self.seen.contains(event)
    }

    fn rendered(&self, entity_id: &EntityId) -> Option<RenderedEntity> {
        self.viewer.scene().rendered_entity(entity_id.as_str())
    }

    fn expected_pose(&self, entity_id: &EntityId, time: Timestamp) -> Option<Pose> {
        self.mission
            .track(entity_id)?
            .sample_at(time, &LinearInterpolator)
    }

    /// Checks the drawn proxy against ground truth at the scene clock.
    fn assert_tracking(&self, entity_id: &EntityId) -> Result<(), String> {
        let now = self.viewer.scene().now();
        let drawn = self
            .rendered(entity_id)
            .ok_or_else(|| format!("{entity_id} is not drawn"))?;
        let truth = self
            .expected_pose(entity_id, now)
            .ok_or_else(|| format!("{entity_id} has no sample at {now}"))?;

        let error = (drawn.position - truth.position).norm();
        check(drawn.visible, || format!("{entity_id} hidden at {now}"))?;
        check(error < POSITION_TOLERANCE, || {
            format!("{entity_id} drawn {error:.3}m from truth at {now}")
        })
    }

    fn record(&mut self, info: &FrameInfo) {
        let Some((export, interval)) = self.export.as_mut() else {
            return;
        };
        if info.frame % *interval != 0 {
            return;
        }
        let scene = self.viewer.scene();
        export.add_frame(SimFrame {
            frame: info.frame,
            time_sec: info.time,
            progress: self.viewer.progress(),
            camera: scene.camera_view().position.into(),
            entities: scene.rendered().iter().map(EntityPosition::from).collect(),
            events: std::mem::take(&mut self.pending),
        });
    }

    fn metrics(&self) -> ScenarioMetrics {
        let cache = self.viewer.cache_stats();
        ScenarioMetrics {
            assets_fetched: self.fetcher.fetch_count(),
            assets_failed: self.last_report.as_ref().map_or(0, |r| r.failed() as u64),
            cache_hits: cache.hits,
            cache_write_failures: cache.failed_writes,
            final_progress: self.viewer.progress(),
            flights_completed: self.viewer.scene().flights_completed(),
            events: self.seen.len() as u64,
        }
    }
}

fn check(condition: bool, reason: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

fn same_position(a: &RenderedEntity, b: &RenderedEntity) -> bool {
    (a.position - b.position).norm() < POSITION_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_scenario_passes() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
        }
    }

    #[test]
    fn test_scenarios_are_deterministic() {
        let a = ScenarioRunner::new(7).run(ScenarioId::Nominal);
        let b = ScenarioRunner::new(7).run(ScenarioId::Nominal);

        assert!(a.passed && b.passed);
        assert_eq!(a.total_frames, b.total_frames);
        assert_eq!(a.final_time_secs, b.final_time_secs);
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn test_nominal_metrics() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Nominal);

        assert!(result.passed);
        assert_eq!(result.metrics.final_progress, 100);
        assert_eq!(result.metrics.assets_fetched, 5);
        assert_eq!(result.metrics.flights_completed, 1);
        assert!(result.total_frames > 0);
    }

    #[test]
    fn test_scene_failure_reports_no_frames() {
        let result = ScenarioRunner::new(1).run(ScenarioId::SceneFailure);

        assert!(result.passed);
        assert_eq!(result.total_frames, 0);
        assert_eq!(result.metrics.assets_fetched, 0);
    }

    #[test]
    fn test_recorded_run_exports_frames() {
        let (result, export) = ScenarioRunner::new(42).run_recorded(ScenarioId::ClockPause, 5);

        assert!(result.passed);
        assert_eq!(export.scenario, "clock_pause");
        assert!(export.passed);
        assert!(!export.frames.is_empty());
        assert!(export.frames.iter().all(|f| f.frame % 5 == 0));
        assert!(export
            .frames
            .iter()
            .any(|f| f.entities.iter().any(|e| e.id == "perseverance")));
    }

    #[test]
    fn test_short_budget_fails_cleanly() {
        // A flight takes 3s; a 10-frame budget at 60Hz cannot land it
        let result = ScenarioRunner::new(42)
            .with_duration(10.0 / 60.0)
            .run(ScenarioId::Nominal);

        assert!(!result.passed);
        assert!(result
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("camera still moving")));
    }
}
