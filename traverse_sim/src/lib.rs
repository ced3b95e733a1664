//! Traverse Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides a controlled environment where the whole playback
//! stack runs deterministically: preload, camera flights and per-frame
//! synchronization against a headless scene.
//!
//! # Core Principle: Everything From One Seed
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock; fetch latency advances it instead of waiting
//! - **Assets**: In-memory fetcher with injectable failures
//! - **Rendering**: Headless scene stepped one frame at a time
//! - **Randomness**: Missions derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ Viewer<SimScene, SimFetcher, SimContext>             │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │ fetch                  │ step()                     │
//! │  ┌────▼──────┐            ┌────▼─────┐                      │
//! │  │SimFetcher │            │ SimScene │──> SimExport (JSON)  │
//! │  └───────────┘            └──────────┘                      │
//! │       ▲                        ▲ compare                    │
//! │  ┌────┴────────────────────────┴────┐                       │
//! │  │          MissionOracle           │                       │
//! │  │  (Ground Truth Traverses)        │                       │
//! │  └──────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use traverse_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Nominal);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod fetcher;
mod oracle;
mod runner;
mod scene;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{EntityPosition, Position, SimEvent, SimExport, SimFrame};
pub use fetcher::SimFetcher;
pub use oracle::{model_url, MissionConfig, MissionOracle, OracleError, SyntheticMission};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scene::{RenderedEntity, SimScene, SimSceneConfig, SimSceneError};
