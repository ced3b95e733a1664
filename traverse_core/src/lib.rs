//! Traverse Core - Time-Synchronized Trajectory Playback with Staged Preloading
//!
//! This library drives recorded vehicle traverses inside an external 3D scene:
//! 1. **Preload**: ordered, weighted stages fetch terrain, models, trajectories
//!    and landmarks through a session cache, reporting progress as they settle
//! 2. **Tracks**: immutable time-indexed trajectories sampled by interpolation
//! 3. **Playback**: a per-frame synchronizer feeds armed visual proxies
//! 4. **Flight**: a camera state machine where the last request always wins

pub mod documents;
pub mod idle;
pub mod manifest;
pub mod traverse_cache;
pub mod traverse_camera;
pub mod traverse_pipeline;
pub mod traverse_sync;
pub mod traverse_track;
pub mod viewer;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use documents::{decode_landmark_collection, decode_trajectory_document, DocumentError, Landmark};
pub use idle::{IdleRotation, IdleRotationConfig, IdleRotationGuard};
pub use manifest::{PreloadManifest, StageWeights, ViewerConfig};
pub use traverse_cache::{CacheConfig, CacheError, SessionCache};
pub use traverse_camera::{CameraConfig, CameraController, CameraFlight, CameraState, FlyTarget};
pub use traverse_pipeline::{
    PipelineError, PipelineMonitor, PipelineStage, PreloadPipeline, ProgressUpdate, StageStatus,
};
pub use traverse_sync::{Synchronizer, SynchronizerConfig, VisualProxy};
pub use traverse_track::{Interpolator, LinearInterpolator, Track, TrackError, TrackModel, SOL_SECONDS};
pub use viewer::{Viewer, ViewerError, ViewerEvent, ViewerStatus};
