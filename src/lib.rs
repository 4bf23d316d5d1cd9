pub mod config;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod traits;

// Re-export common types for convenience
pub use config::{init_tracing, ConfigError, HarvestConfig};
pub use executor::*;
pub use harvest::formats::all_adapters;
pub use harvest::{HarvestPipeline, HarvestResult, HarvestStats, PipelineError};
pub use model::*;
pub use traits::*;
