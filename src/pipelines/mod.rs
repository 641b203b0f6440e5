//! The per-token assembly pipeline, one module per stage:
//!
//! resolve → assemble → composite → rig → package
//!
//! Every stage takes the [`Scene`](crate::data_structures::scene_graph::Scene)
//! it works on explicitly. Stages after `resolve` report recoverable problems
//! as values instead of aborting.

pub mod assemble;
pub mod composite;
pub mod package;
pub mod resolve;
pub mod rig;
