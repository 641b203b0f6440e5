//! character-assembler
//!
//! Assembles rigged composite characters from catalogued part assets. A token's
//! attribute assignment is resolved through the part catalog, the referenced
//! glTF parts are imported into an in-memory scene, a face texture is
//! composited onto the head material, all parts are bound to one skeleton and
//! the result is packaged as a single `.glb`. The same pipeline runs for one
//! token or for an ordered batch of thousands, each token on a freshly reset
//! scene.
//!
//! High-level modules
//! - `catalog`: part catalog, token assignments and token ids
//! - `config`: assembler configuration loaded from TOML
//! - `context`: the explicit commands (resolve, build, export) over one scene
//! - `data_structures`: scene graph, materials, images and transforms
//! - `error`: error types of every stage
//! - `flow`: batch orchestration and the command entrypoint
//! - `pipelines`: the per-token stages
//! - `resources`: glTF import and export, file loading
//!

pub mod catalog;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
pub mod pipelines;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use catalog::{Catalog, TokenAssignments, TokenId};
pub use config::AssemblerConfig;
pub use context::{BuildReport, Context};
pub use data_structures::scene_graph::Scene;
pub use flow::{BatchLog, run_batch};
