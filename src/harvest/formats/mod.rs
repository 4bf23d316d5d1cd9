//! Ecosystem adapter implementations.
//!
//! - `npm` - `package-lock.json` projects
//! - `pip` - Python projects managed by pipenv, poetry or a plain interpreter

pub mod npm;
pub mod pip;

use std::sync::Arc;

use crate::executor::CommandRunner;
use crate::traits::EcosystemAdapter;

pub use npm::NpmAdapter;
pub use pip::{Pip, PythonAdapter, PythonTool};

/// Every supported adapter, in selection order.
pub fn all_adapters(runner: Arc<dyn CommandRunner>) -> Vec<Box<dyn EcosystemAdapter>> {
    vec![
        Box::new(NpmAdapter::new(runner.clone())),
        Box::new(Pip::new(runner)),
    ]
}
