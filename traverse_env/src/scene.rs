//! Scene/renderer abstraction consumed by the playback core.

use crate::error::EnvError;
use crate::types::{
    AssetPayload, CallbackId, CameraView, EntityHandle, EntitySpec, FlyToRequest, FrameCallback,
    Timestamp,
};

/// The external 3D scene.
///
/// The core treats the scene as opaque: it can accept entities, run a
/// callback once per rendered frame, animate the camera and report the
/// simulation clock. Entity poses are supplied as accessor closures that the
/// scene evaluates at its own draw time.
///
/// ```text
/// Viewer                      Scene
///   |-- add_entity(spec) ------->|  stores accessors
///   |-- register_per_frame ----->|
///   |                            |-- frame: callback(FrameInfo)
///   |                            |-- draw: spec.position(), spec.orientation()
///   |-- fly_to(request) -------->|-- ... -- request.on_complete()
/// ```
pub trait Scene: Send + Sync + 'static {
    /// Adds a renderable entity whose pose is read through accessors.
    fn add_entity(&self, spec: EntitySpec) -> Result<EntityHandle, EnvError>;

    /// Removes an entity. Returns `false` if the handle was unknown.
    fn remove_entity(&self, handle: EntityHandle) -> bool;

    /// Registers a terrain/tileset payload with the scene.
    fn load_terrain(&self, key: &str, payload: &AssetPayload) -> Result<(), EnvError>;

    /// Registers a function invoked once per rendered frame.
    fn register_per_frame_callback(&self, callback: FrameCallback) -> CallbackId;

    /// Unregisters a per-frame callback. Returns `false` if the id was unknown.
    fn unregister_per_frame_callback(&self, id: CallbackId) -> bool;

    /// Starts an animated camera transition.
    ///
    /// A new request replaces any flight in progress; the replaced flight's
    /// `on_complete` is dropped without being called.
    fn fly_to(&self, request: FlyToRequest);

    /// Aborts any flight in progress without calling its completion.
    fn cancel_flight(&self);

    /// Sets the camera immediately (no animation).
    fn set_view(&self, view: CameraView);

    /// Returns the current camera view.
    fn camera_view(&self) -> CameraView;

    /// Current simulation time.
    fn now(&self) -> Timestamp;

    /// Whether the simulation clock is advancing.
    fn is_animating(&self) -> bool;
}
