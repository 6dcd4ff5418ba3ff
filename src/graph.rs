//! Dependency-closure discovery.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::analyze::{ListedDependency, Listing, Resolution};
use crate::command::CommandRunner;
use crate::exclude::ExclusionPolicy;
use crate::paths::{find_library, is_system_path};
use crate::platform::Relocator;

/// A reference that was found but could not be followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryWarning {
    /// The referenced library does not exist on disk (or `ldd` said "not found").
    Missing { consumer: PathBuf, name: String },
    /// A loader-relative reference (`@rpath/...`) that is not resolved.
    LoaderRelative { consumer: PathBuf, name: String },
}

/// Nodes are canonical paths; each node maps the symbolic name it uses for a
/// dependency to that dependency's canonical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    root: PathBuf,
    nodes: BTreeMap<PathBuf, BTreeMap<String, PathBuf>>,
    warnings: Vec<DiscoveryWarning>,
}

impl DependencyGraph {
    /// Canonical path of the primary artifact.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Path> {
        self.nodes.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root is a node of every graph. Present so `len`
    /// has its usual companion (clippy `len_without_is_empty`).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.nodes.contains_key(path)
    }

    /// Outgoing edges of `node`, keyed by symbolic name.
    pub fn dependencies(&self, node: &Path) -> Option<&BTreeMap<String, PathBuf>> {
        self.nodes.get(node)
    }

    pub fn warnings(&self) -> &[DiscoveryWarning] {
        &self.warnings
    }
}

/// Walk the dependency closure of `input`.
///
/// Every file reached is listed once, even when the graph has cycles or
/// diamonds. An entry is dropped when it lives in a system directory, when the
/// exclusion policy matches its filename, or when it cannot be found; dropped
/// entries are never expanded.
///
/// `search_paths` are consulted, in order, for libraries the platform lister
/// could not locate.
///
/// # Errors
///
/// Returns an error if:
/// - `input` does not exist
/// - the platform lister fails hard (e.g. `otool` failing on macOS)
/// - an exclusion pattern is not a valid regex
pub fn resolve_closure(
    input: &Path,
    relocator: &dyn Relocator,
    runner: &dyn CommandRunner,
    policy: &ExclusionPolicy,
    search_paths: &[PathBuf],
) -> Result<DependencyGraph> {
    if !input.exists() {
        bail!("File does not exist: {}", input.display());
    }
    let root = fs::canonicalize(input)
        .with_context(|| format!("Failed to canonicalize {}", input.display()))?;

    let resolver = Resolver {
        relocator,
        policy,
        search_paths,
    };
    let mut nodes = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut to_process = vec![root.clone()];

    while let Some(path) = to_process.pop() {
        if nodes.contains_key(&path) {
            continue;
        }
        info!("  Processing: {}", path.display());

        let listed = match relocator.list_dependencies(runner, &path)? {
            Listing::NotDynamic => {
                info!(
                    "  Info: not a dynamic artifact, not expanding: {}",
                    path.display()
                );
                Vec::new()
            }
            Listing::Dependencies(deps) => deps,
        };

        let mut edges = BTreeMap::new();
        for dep in listed {
            let Some(target) = resolver.locate(&path, &dep, &mut warnings)? else {
                continue;
            };
            if target == path {
                continue;
            }
            if !nodes.contains_key(&target) {
                to_process.push(target.clone());
            }
            edges.insert(dep.name, target);
        }
        nodes.insert(path, edges);
    }

    info!("--- Dependency Analysis Complete ---");
    info!("Found {} total files to process.", nodes.len());

    Ok(DependencyGraph {
        root,
        nodes,
        warnings,
    })
}

struct Resolver<'a> {
    relocator: &'a dyn Relocator,
    policy: &'a ExclusionPolicy,
    search_paths: &'a [PathBuf],
}

impl Resolver<'_> {
    /// Decide where `dep` points, or `None` if it should not be bundled.
    fn locate(
        &self,
        consumer: &Path,
        dep: &ListedDependency,
        warnings: &mut Vec<DiscoveryWarning>,
    ) -> Result<Option<PathBuf>> {
        if let Resolution::Path(path) = &dep.resolution {
            if is_system_path(path, self.relocator.system_prefixes()) {
                debug!("    system directory, skipping: {}", path.display());
                return Ok(None);
            }
        }

        let filename = dep.filename();
        if let Some(reason) = self.policy.reason(filename)? {
            info!("    --> Ignoring {}: {}", reason, filename);
            return Ok(None);
        }

        let found = match &dep.resolution {
            Resolution::LoaderRelative => {
                warn!(
                    "Loader-relative dependency found. Resolution not implemented: {}",
                    dep.name
                );
                warnings.push(DiscoveryWarning::LoaderRelative {
                    consumer: consumer.to_path_buf(),
                    name: dep.name.clone(),
                });
                return Ok(None);
            }
            Resolution::Path(path) if path.exists() => Some(path.clone()),
            Resolution::Path(_) => None,
            Resolution::Unresolved => find_library(&dep.name, self.search_paths),
        };

        let Some(found) = found else {
            warn!("Could not find dependency: {}", dep.name);
            warnings.push(DiscoveryWarning::Missing {
                consumer: consumer.to_path_buf(),
                name: dep.name.clone(),
            });
            return Ok(None);
        };

        let canonical = fs::canonicalize(&found)
            .with_context(|| format!("Failed to canonicalize {}", found.display()))?;
        Ok(Some(canonical))
    }
}
