//! Harvest module - dependency extraction across package-manager ecosystems.
//!
//! - **State**: per-adapter lifecycle cache via [`AdapterState`]
//! - **Graph**: edge attachment over a flat module list via [`build_dependency_graph`]
//! - **Formats**: the npm and Python adapters
//! - **Pipeline**: async orchestrator via [`pipeline::HarvestPipeline`]

pub mod formats;
pub mod graph;
pub mod pipeline;
pub mod traits;

pub use traits::{AdapterState, Lifecycle, MetadataMap, ModuleMetadata};

pub use graph::{build_dependency_graph, DependencyTree, GraphError};

pub use pipeline::{HarvestPipeline, HarvestResult, HarvestStats, PipelineError};
