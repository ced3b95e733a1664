//! The "FLIGHT" Engine - Camera Transition State Machine
//!
//! ```text
//!          fly_to(A)              complete(A)
//!   Idle ─────────────> Transitioning ─────────> Idle
//!                         │     ^
//!                fly_to(B)└─────┘ A superseded, A.on_complete dropped
//!
//!   reset(): any state ──> Idle at the home view (hard cut)
//! ```
//!
//! Every request gets a generation number. A completion callback only runs
//! if its generation is still the one in flight, so a superseded flight can
//! never fire even if the scene reports it late.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use traverse_env::{CameraView, Easing, FlyToRequest, Scene};

/// No flight in progress.
const NO_FLIGHT: u64 = 0;

// ============================================================================
// TYPES
// ============================================================================

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraState {
    Idle,
    Transitioning,
}

/// Where a flight should end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlyTarget {
    /// Frame a bounding sphere from the configured viewing direction
    BoundingSphere { center: Vector3<f64>, radius: f64 },

    /// Explicit destination and orientation
    Destination(CameraView),
}

/// Identifies one issued flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlightTicket(pub u64);

/// Configuration for the camera controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Canonical view restored on reset
    pub home: CameraView,

    /// Flight duration used when none is given
    pub flight_duration: Duration,

    /// Easing used when none is given
    pub easing: Easing,

    /// Camera distance as a multiple of the bounding radius
    pub range_factor: f64,

    /// Lower bound on camera distance
    pub min_range: f64,

    /// Direction from target to camera (normalized on use)
    pub view_offset: Vector3<f64>,

    /// Up vector for look-at orientation
    pub up: Vector3<f64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let up = Vector3::z();
        Self {
            home: CameraView::looking_at(Vector3::new(-400.0, -400.0, 300.0), Vector3::zeros(), up),
            flight_duration: Duration::from_secs(3),
            easing: Easing::CubicInOut,
            range_factor: 3.0,
            min_range: 10.0,
            view_offset: Vector3::new(-1.0, -1.0, 1.0),
            up,
        }
    }
}

impl CameraConfig {
    /// Resolves a target into a concrete camera view.
    pub fn destination(&self, target: &FlyTarget) -> CameraView {
        match *target {
            FlyTarget::Destination(view) => view,
            FlyTarget::BoundingSphere { center, radius } => {
                let range = (radius.abs() * self.range_factor).max(self.min_range);
                let direction = self
                    .view_offset
                    .try_normalize(1e-12)
                    .unwrap_or_else(Vector3::z);
                CameraView::looking_at(center + direction * range, center, self.up)
            }
        }
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// Drives the scene camera, guaranteeing last-request-wins semantics.
pub struct CameraController<S: Scene> {
    scene: Arc<S>,
    config: CameraConfig,
    next_generation: AtomicU64,
    in_flight: Arc<AtomicU64>,
}

impl<S: Scene> CameraController<S> {
    pub fn new(scene: Arc<S>, config: CameraConfig) -> Self {
        Self {
            scene,
            config,
            next_generation: AtomicU64::new(1),
            in_flight: Arc::new(AtomicU64::new(NO_FLIGHT)),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn state(&self) -> CameraState {
        if self.in_flight.load(Ordering::SeqCst) == NO_FLIGHT {
            CameraState::Idle
        } else {
            CameraState::Transitioning
        }
    }

    /// Flies to `target` with the configured easing and duration.
    pub fn fly_to<F>(&self, target: FlyTarget, on_complete: F) -> FlightTicket
    where
        F: FnOnce() + Send + 'static,
    {
        self.fly_to_with(target, self.config.easing, self.config.flight_duration, on_complete)
    }

    /// Flies to `target`, superseding any flight in progress.
    pub fn fly_to_with<F>(
        &self,
        target: FlyTarget,
        easing: Easing,
        duration: Duration,
        on_complete: F,
    ) -> FlightTicket
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.in_flight.swap(generation, Ordering::SeqCst);
        if previous != NO_FLIGHT {
            debug!("Flight {} superseded by {}", previous, generation);
        }

        let in_flight = Arc::clone(&self.in_flight);
        let guarded = move || {
            if in_flight
                .compare_exchange(generation, NO_FLIGHT, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                debug!("Flight {} complete", generation);
                on_complete();
            } else {
                debug!("Dropping completion of stale flight {}", generation);
            }
        };

        self.scene.fly_to(FlyToRequest {
            destination: self.config.destination(&target),
            easing,
            duration,
            on_complete: Box::new(guarded),
        });

        FlightTicket(generation)
    }

    /// Cuts to the home view, aborting any flight without completing it.
    pub fn reset(&self) {
        let previous = self.in_flight.swap(NO_FLIGHT, Ordering::SeqCst);
        if previous != NO_FLIGHT {
            debug!("Flight {} cancelled by reset", previous);
        }
        self.scene.cancel_flight();
        self.scene.set_view(self.config.home);
    }
}

// ============================================================================
// FLIGHT INTERPOLATION
// ============================================================================

/// An eased camera move between two views.
///
/// Scene implementations use this to animate `fly_to` requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFlight {
    pub from: CameraView,
    pub to: CameraView,
    pub easing: Easing,
    pub duration: Duration,
}

impl CameraFlight {
    pub fn new(from: CameraView, to: CameraView, easing: Easing, duration: Duration) -> Self {
        Self {
            from,
            to,
            easing,
            duration,
        }
    }

    /// Linear progress in [0, 1] after `elapsed`.
    pub fn fraction(&self, elapsed: Duration) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }

    pub fn is_complete(&self, elapsed: Duration) -> bool {
        elapsed >= self.duration
    }

    /// Camera view after `elapsed`.
    pub fn view_at(&self, elapsed: Duration) -> CameraView {
        if self.is_complete(elapsed) {
            return self.to;
        }
        let t = self.easing.apply(self.fraction(elapsed));
        CameraView {
            position: self.from.position.lerp(&self.to.position, t),
            orientation: slerp_or_snap(&self.from.orientation, &self.to.orientation, t),
        }
    }
}

/// Slerp that snaps when the rotations are antipodal.
fn slerp_or_snap(
    a: &UnitQuaternion<f64>,
    b: &UnitQuaternion<f64>,
    t: f64,
) -> UnitQuaternion<f64> {
    a.try_slerp(b, t, 1e-9)
        .unwrap_or(if t < 0.5 { *a } else { *b })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestScene;
    use approx::assert_relative_eq;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&count);
        (count, move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn sphere(x: f64) -> FlyTarget {
        FlyTarget::BoundingSphere {
            center: Vector3::new(x, 0.0, 0.0),
            radius: 5.0,
        }
    }

    #[test]
    fn test_flight_completes_to_idle() {
        let scene = Arc::new(TestScene::default());
        let camera = CameraController::new(Arc::clone(&scene), CameraConfig::default());
        let (count, hook) = counter();

        camera.fly_to(sphere(0.0), hook);
        assert_eq!(camera.state(), CameraState::Transitioning);

        scene.complete_flight();
        assert_eq!(camera.state(), CameraState::Idle);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_superseded_flight_never_completes() {
        let scene = Arc::new(TestScene::default());
        let camera = CameraController::new(Arc::clone(&scene), CameraConfig::default());
        let (a_count, a_hook) = counter();
        let (b_count, b_hook) = counter();

        camera.fly_to(sphere(0.0), a_hook);
        camera.fly_to(sphere(100.0), b_hook);
        scene.complete_flight();

        assert_eq!(a_count.load(Ordering::SeqCst), 0);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
        assert_eq!(camera.state(), CameraState::Idle);
    }

    #[test]
    fn test_late_completion_of_stale_flight_is_dropped() {
        let scene = Arc::new(TestScene::default());
        let camera = CameraController::new(Arc::clone(&scene), CameraConfig::default());
        let (a_count, a_hook) = counter();
        let (b_count, b_hook) = counter();

        camera.fly_to(sphere(0.0), a_hook);
        // A scene that hands back A's callback instead of dropping it
        let stale = scene.take_flight().unwrap();
        camera.fly_to(sphere(100.0), b_hook);

        (stale.on_complete)();
        assert_eq!(a_count.load(Ordering::SeqCst), 0);
        assert_eq!(camera.state(), CameraState::Transitioning);

        scene.complete_flight();
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_is_hard_cut() {
        let scene = Arc::new(TestScene::default());
        let config = CameraConfig::default();
        let camera = CameraController::new(Arc::clone(&scene), config);
        let (count, hook) = counter();

        camera.fly_to(sphere(0.0), hook);
        camera.reset();

        assert_eq!(camera.state(), CameraState::Idle);
        assert_eq!(scene.camera_view(), config.home);
        assert_eq!(scene.flights_cancelled.load(Ordering::SeqCst), 1);
        scene.complete_flight();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bounding_sphere_destination() {
        let config = CameraConfig::default();
        let center = Vector3::new(10.0, 20.0, 0.0);
        let view = config.destination(&FlyTarget::BoundingSphere { center, radius: 5.0 });

        assert_relative_eq!((view.position - center).norm(), 15.0, epsilon = 1e-9);
        let to_target = (center - view.position).normalize();
        assert_relative_eq!(view.forward(), to_target, epsilon = 1e-9);

        // Tiny spheres are clamped to the minimum range
        let view = config.destination(&FlyTarget::BoundingSphere { center, radius: 0.1 });
        assert_relative_eq!((view.position - center).norm(), config.min_range, epsilon = 1e-9);
    }

    #[test]
    fn test_flight_interpolation() {
        let from = CameraView::looking_at(Vector3::new(0.0, -10.0, 0.0), Vector3::zeros(), Vector3::z());
        let to = CameraView::looking_at(Vector3::new(10.0, -10.0, 0.0), Vector3::new(10.0, 0.0, 0.0), Vector3::z());
        let flight = CameraFlight::new(from, to, Easing::Linear, Duration::from_secs(2));

        assert_eq!(flight.view_at(Duration::ZERO).position, from.position);
        assert_relative_eq!(
            flight.view_at(Duration::from_secs(1)).position,
            Vector3::new(5.0, -10.0, 0.0),
            epsilon = 1e-9
        );
        assert_eq!(flight.view_at(Duration::from_secs(3)), to);
        assert!(flight.is_complete(Duration::from_secs(2)));

        let instant = CameraFlight::new(from, to, Easing::Linear, Duration::ZERO);
        assert_eq!(instant.fraction(Duration::ZERO), 1.0);
    }
}
