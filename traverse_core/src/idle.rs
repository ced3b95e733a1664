//! Rotate-on-idle camera spin with scoped disposal.
//!
//! `IdleRotation::start` registers a per-frame orbit and hands back a guard.
//! The owner disposes the guard on the first user input, selection or
//! teardown; dropping it has the same effect.

use nalgebra::{Unit, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;
use traverse_env::{CallbackId, CameraView, FrameInfo, Scene};

/// Configuration for the idle orbit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdleRotationConfig {
    /// Orbit speed (rad/s)
    pub angular_speed: f64,

    /// Point the camera orbits around
    pub pivot: Vector3<f64>,

    /// Orbit axis
    pub axis: Vector3<f64>,
}

impl Default for IdleRotationConfig {
    fn default() -> Self {
        Self {
            angular_speed: 0.05,
            pivot: Vector3::zeros(),
            axis: Vector3::z(),
        }
    }
}

impl IdleRotationConfig {
    /// Camera view after orbiting for `delta_secs`.
    pub fn advance(&self, view: &CameraView, delta_secs: f64) -> CameraView {
        let axis = Unit::try_new(self.axis, 1e-12).unwrap_or_else(Vector3::z_axis);
        let rotation = UnitQuaternion::from_axis_angle(&axis, self.angular_speed * delta_secs);
        CameraView {
            position: self.pivot + rotation * (view.position - self.pivot),
            orientation: rotation * view.orientation,
        }
    }
}

/// Starts idle rotations.
pub struct IdleRotation;

impl IdleRotation {
    /// Registers the orbit on `scene` and returns its disposer.
    pub fn start<S: Scene>(scene: &Arc<S>, config: IdleRotationConfig) -> IdleRotationGuard<S> {
        let active = Arc::new(AtomicBool::new(true));
        // Weak: the scene owns the callback
        let weak = Arc::downgrade(scene);
        let flag = Arc::clone(&active);

        let callback = scene.register_per_frame_callback(Box::new(move |frame: &FrameInfo| {
            if !flag.load(Ordering::SeqCst) {
                return;
            }
            if let Some(scene) = weak.upgrade() {
                let view = config.advance(&scene.camera_view(), frame.delta_secs);
                scene.set_view(view);
            }
        }));
        debug!("Idle rotation started");

        IdleRotationGuard {
            scene: Arc::downgrade(scene),
            callback: Some(callback),
            active,
        }
    }
}

/// Disposer for a running idle rotation.
pub struct IdleRotationGuard<S: Scene> {
    scene: Weak<S>,
    callback: Option<CallbackId>,
    active: Arc<AtomicBool>,
}

impl<S: Scene> IdleRotationGuard<S> {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops the rotation. Idempotent.
    pub fn dispose(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(id) = self.callback.take() {
            if let Some(scene) = self.scene.upgrade() {
                scene.unregister_per_frame_callback(id);
            }
            debug!("Idle rotation disposed");
        }
    }
}

impl<S: Scene> Drop for IdleRotationGuard<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}
