//! Dependency graph assembly.
//!
//! [`build_dependency_graph`] links a flat module list into a rooted DAG by
//! filling each package's `children` map with ids of other entries of the
//! same list. Nothing is copied: a package depended on by many parents is
//! referenced, not duplicated.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, info};

use crate::harvest::traits::MetadataMap;
use crate::model::{Package, PackageId};

#[derive(Error, Debug)]
pub enum GraphError {
    /// The metadata mapping was never produced upstream
    #[error("Module metadata unavailable; modules must be loaded before building the graph")]
    MetadataUnavailable,
}

/// Attaches dependency edges to `modules` and returns how many were added.
///
/// For every package P with a metadata record, each declared dependency D is
/// resolved to an entry of `modules` named exactly D. When several versions
/// exist, non-dev entries are preferred for non-dev parents, then the version
/// recorded in D's own metadata, then list order. Declared names with no
/// matching entry are dropped. Self-edges and edges that would close a cycle
/// are skipped, so the result stays acyclic even when the declarations are
/// not.
pub fn build_dependency_graph(
    modules: &mut [Package],
    metainfo: Option<&MetadataMap>,
) -> Result<usize, GraphError> {
    let metainfo = metainfo.ok_or(GraphError::MetadataUnavailable)?;

    let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, module) in modules.iter().enumerate() {
        by_name.entry(module.name.clone()).or_default().push(index);
    }

    let mut edges = 0;
    for parent in 0..modules.len() {
        let Some(meta) = metainfo.get(&modules[parent].name) else {
            continue;
        };
        let parent_dev = modules[parent].dev && !modules[parent].root;

        for dep in &meta.dependencies {
            let Some(candidates) = by_name.get(dep) else {
                debug!(
                    parent = %modules[parent].name,
                    dependency = %dep,
                    "Dependency not resolved, dropping edge"
                );
                continue;
            };
            let preferred_version = metainfo.get(dep).map(|m| m.version.as_str());
            let child = pick_candidate(modules, candidates, parent_dev, preferred_version);

            if child == parent || reaches(modules, child, parent) {
                debug!(
                    parent = %modules[parent].name,
                    dependency = %dep,
                    "Skipping edge that would form a cycle"
                );
                continue;
            }

            if modules[parent]
                .children
                .insert(dep.clone(), PackageId(child))
                .is_none()
            {
                edges += 1;
            }
        }
    }

    info!(modules = modules.len(), edges, "Dependency graph built");
    Ok(edges)
}

fn pick_candidate(
    modules: &[Package],
    candidates: &[usize],
    parent_dev: bool,
    preferred_version: Option<&str>,
) -> usize {
    let pool: Vec<usize> = if parent_dev {
        candidates.to_vec()
    } else {
        let non_dev: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&c| !modules[c].dev)
            .collect();
        if non_dev.is_empty() {
            candidates.to_vec()
        } else {
            non_dev
        }
    };

    preferred_version
        .and_then(|v| pool.iter().copied().find(|&c| modules[c].version == v))
        .unwrap_or(pool[0])
}

/// True if `to` is reachable from `from` through existing `children` edges.
fn reaches(modules: &[Package], from: usize, to: usize) -> bool {
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        stack.extend(modules[current].children.values().map(|id| id.index()));
    }
    false
}

/// Read-only view over a module list whose `children` ids point into it.
#[derive(Debug, Clone, Copy)]
pub struct DependencyTree<'a> {
    modules: &'a [Package],
}

impl<'a> DependencyTree<'a> {
    pub fn new(modules: &'a [Package]) -> Self {
        Self { modules }
    }

    pub fn root(&self) -> Option<PackageId> {
        self.modules.iter().position(|m| m.root).map(PackageId)
    }

    pub fn get(&self, id: PackageId) -> Option<&'a Package> {
        self.modules.get(id.index())
    }

    /// Direct dependencies of `id`, keyed by dependency name.
    pub fn children(&self, id: PackageId) -> impl Iterator<Item = (&'a str, &'a Package)> + 'a {
        let modules = self.modules;
        modules
            .get(id.index())
            .into_iter()
            .flat_map(|m| m.children.iter())
            .filter_map(move |(key, child)| modules.get(child.index()).map(|p| (key.as_str(), p)))
    }

    /// Distinct packages reachable from the root (root included), breadth
    /// first. Empty when no package is marked root.
    pub fn reachable(&self) -> Vec<PackageId> {
        let Some(root) = self.root() else {
            return Vec::new();
        };
        let mut order = vec![root];
        let mut seen = HashSet::from([root]);
        let mut next = 0;
        while next < order.len() {
            let current = order[next];
            next += 1;
            if let Some(module) = self.get(current) {
                for child in module.children.values() {
                    if seen.insert(*child) {
                        order.push(*child);
                    }
                }
            }
        }
        order
    }

    pub fn edge_count(&self) -> usize {
        self.modules.iter().map(|m| m.children.len()).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================
