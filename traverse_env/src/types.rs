//! Common types for the Traverse environment abstraction.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Simulation time in seconds on the scene's epoch.
pub type Timestamp = f64;

/// Identifier of an animated entity (a vehicle with a recorded track).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Creates an EntityId from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A position with an optional orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position [x, y, z] in scene meters
    pub position: Vector3<f64>,

    /// Body orientation, if recorded
    pub orientation: Option<UnitQuaternion<f64>>,
}

impl Pose {
    /// Creates a pose with no orientation.
    pub fn new(position: Vector3<f64>) -> Self {
        Self {
            position,
            orientation: None,
        }
    }

    /// Attaches an orientation.
    pub fn with_orientation(mut self, orientation: UnitQuaternion<f64>) -> Self {
        self.orientation = Some(orientation);
        self
    }
}

/// Raw payload delivered by the asset collaborator.
///
/// JSON documents are kept parsed so that storing and retrieving them is
/// structurally lossless.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetPayload {
    /// Opaque binary data (models, imagery)
    Bytes(Arc<[u8]>),

    /// Parsed JSON document (trajectories, feature collections)
    Json(serde_json::Value),
}

impl AssetPayload {
    /// Wraps raw bytes.
    pub fn bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(data.into())
    }

    /// Returns the JSON value if this payload is JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    /// Returns the raw bytes if this payload is binary.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(data) => Some(data),
            Self::Json(_) => None,
        }
    }

    /// Approximate storage footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Bytes(data) => data.len(),
            Self::Json(value) => value.to_string().len(),
        }
    }
}

/// Camera position and orientation.
///
/// Orientation follows the look-at convention used throughout the crate:
/// the camera's local +Z axis points along the view direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl CameraView {
    /// Creates a view at `eye` looking towards `target`.
    ///
    /// Falls back to an alternate up axis when the view direction is parallel
    /// to `up`, and to the identity orientation when `eye == target`.
    pub fn looking_at(eye: Vector3<f64>, target: Vector3<f64>, up: Vector3<f64>) -> Self {
        let dir = target - eye;
        if dir.norm() < 1e-9 {
            return Self {
                position: eye,
                orientation: UnitQuaternion::identity(),
            };
        }

        let up = if dir.normalize().cross(&up.normalize()).norm() < 1e-6 {
            Vector3::x()
        } else {
            up
        };

        Self {
            position: eye,
            orientation: UnitQuaternion::face_towards(&dir, &up),
        }
    }

    /// Unit vector the camera is looking along.
    pub fn forward(&self) -> Vector3<f64> {
        self.orientation * Vector3::z()
    }
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
        }
    }
}

/// Easing curve applied to a camera transition's normalized time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    Linear,
    QuadraticInOut,
    CubicOut,
    #[default]
    CubicInOut,
    SineInOut,
}

impl Easing {
    /// Maps `t` in [0, 1] onto the eased progress in [0, 1].
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Easing::Linear => t,
            Easing::QuadraticInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Easing::CubicOut => 1.0 - (1.0 - t).powi(3),
            Easing::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Easing::SineInOut => -((std::f64::consts::PI * t).cos() - 1.0) / 2.0,
        }
    }
}

/// A lazily evaluated value, re-read by the scene on every draw.
pub type Accessor<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Reference to a loaded 3D model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRef {
    /// Logical asset key the model was loaded under
    pub key: String,

    /// Model bytes (glTF/GLB)
    pub data: Arc<[u8]>,
}

/// Description of an entity handed to the scene.
#[derive(Clone)]
pub struct EntitySpec {
    /// Display name
    pub name: String,

    /// Model to render
    pub model: ModelRef,

    /// Position source, evaluated at draw time
    pub position: Accessor<Vector3<f64>>,

    /// Orientation source, evaluated at draw time
    pub orientation: Accessor<Option<UnitQuaternion<f64>>>,

    /// Visibility source, evaluated at draw time
    pub visible: Accessor<bool>,
}

impl std::fmt::Debug for EntitySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySpec")
            .field("name", &self.name)
            .field("model", &self.model.key)
            .finish_non_exhaustive()
    }
}

/// Handle to an entity owned by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle(pub u64);

/// Handle to a registered per-frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(pub u64);

/// Per-frame information passed to callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Frame counter since scene creation
    pub frame: u64,

    /// Current simulation time
    pub time: Timestamp,

    /// Wall-clock seconds since the previous frame
    pub delta_secs: f64,

    /// Whether the simulation clock is advancing
    pub animating: bool,
}

/// Function invoked once per rendered frame.
pub type FrameCallback = Box<dyn FnMut(&FrameInfo) + Send>;

/// An animated camera transition request.
pub struct FlyToRequest {
    /// Final camera view
    pub destination: CameraView,

    /// Easing curve
    pub easing: Easing,

    /// Total duration
    pub duration: Duration,

    /// Called once when the flight reaches its destination
    pub on_complete: Box<dyn FnOnce() + Send>,
}

impl std::fmt::Debug for FlyToRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlyToRequest")
            .field("destination", &self.destination)
            .field("easing", &self.easing)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}
