//! Traverse Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Traverse playback
//! engines to run against a **Production** environment (tokio, real files, a real
//! renderer) or a **Simulation** environment (virtual clock, in-memory assets,
//! headless scene).
//!
//! # Core Concept: External Collaborators
//!
//! The playback core never talks to the outside world directly. Everything is
//! behind one of three traits:
//! - Time and task spawning (`TraverseContext`)
//! - Asset download (`AssetFetcher`)
//! - The 3D scene/renderer (`Scene`)
//!
//! # Example
//!
//! ```ignore
//! use traverse_env::{AssetFetcher, Scene, TraverseContext};
//!
//! async fn warm_up<Ctx: TraverseContext, F: AssetFetcher, S: Scene>(
//!     ctx: &Ctx,
//!     fetcher: &F,
//!     scene: &S,
//! ) {
//!     let terrain = fetcher.fetch_asset("terrain/gale.json").await?;
//!     scene.load_terrain("terrain", &terrain)?;
//!     ctx.sleep(Duration::from_millis(16)).await;
//! }
//! ```

mod context;
mod error;
mod fetch;
mod scene;
mod tokio_impl;
mod types;

pub use context::TraverseContext;
pub use error::EnvError;
pub use fetch::{AssetFetcher, FetchController};
pub use scene::Scene;
pub use tokio_impl::{FileFetcher, TokioContext};
pub use types::{
    Accessor, AssetPayload, CallbackId, CameraView, Easing, EntityHandle, EntityId, EntitySpec,
    FlyToRequest, FrameCallback, FrameInfo, ModelRef, Pose, Timestamp,
};
