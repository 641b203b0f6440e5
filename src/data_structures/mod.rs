//! Scene data structures: objects, materials, images, and transforms.
//!
//! This module contains the core data types the assembly pipeline works on:
//!
//! - `scene_graph` holds the [`Scene`](scene_graph::Scene) context, its objects and resource pools
//! - `material` contains materials and their shading node graphs
//! - `texture` holds decoded images and the pixel blending used when baking graphs
//! - `instance` holds decomposed transformations and matrix helpers

pub mod instance;
pub mod material;
pub mod scene_graph;
pub mod texture;
