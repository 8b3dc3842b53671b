//! Transitive shared-library closure.
//!
//! Discovery and planning are separate steps. [`ClosureAssembler::discover`]
//! walks the dependency graph (sequentially, or one frontier at a time in
//! parallel) and only records what it sees. [`ClosureAssembler::plan`] runs
//! once the whole graph is known and makes every decision: unresolved
//! libraries, duplicate identifiers and install paths. Doing dedup while
//! the graph is still being discovered would let traversal order pick the
//! winner.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use super::introspect::{Introspector, RawDependency};
use crate::error::{AssembleError, Result};
use crate::verify::BinaryArtifact;

/// A library seen during traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryReference {
    pub identifier: String,
    /// Empty when the introspector could not locate the library.
    pub resolved_path: PathBuf,
    pub requested_by: BTreeSet<PathBuf>,
}

impl LibraryReference {
    pub fn is_resolved(&self) -> bool {
        !self.resolved_path.as_os_str().is_empty()
    }
}

/// Where one library ends up inside the image root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct InstallMapping {
    pub identifier: String,
    pub source: PathBuf,
    /// Absolute path inside the image root.
    pub destination: PathBuf,
}

/// What to do when one identifier resolves to several source paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the lexicographically first `(identifier, path)` pair.
    ///
    /// This is a deterministic tie-break, not version precedence: nothing
    /// checks that the kept copy is the newest or most correct one.
    #[default]
    FirstSorted,
    /// Refuse to choose.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "first-sorted" => Ok(Self::FirstSorted),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown duplicate policy '{}' (expected first-sorted or reject)",
                other
            )),
        }
    }
}

/// Everything discovered from one root binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    pub root: PathBuf,
    /// Keyed and therefore ordered by `(identifier, resolved_path)`.
    pub references: BTreeMap<(String, PathBuf), LibraryReference>,
}

impl DependencyGraph {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            references: BTreeMap::new(),
        }
    }

    /// Record one edge. Returns the path to traverse next, if any.
    fn record(&mut self, requested_by: &Path, dep: RawDependency) -> Option<PathBuf> {
        if dep.path == requested_by || dep.path == self.root {
            return None;
        }
        let next = dep.is_resolved().then(|| dep.path.clone());
        self.references
            .entry((dep.identifier.clone(), dep.path.clone()))
            .or_insert_with(|| LibraryReference {
                identifier: dep.identifier,
                resolved_path: dep.path,
                requested_by: BTreeSet::new(),
            })
            .requested_by
            .insert(requested_by.to_path_buf());
        next
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &LibraryReference> {
        self.references.values().filter(|r| !r.is_resolved())
    }
}

/// Computes install mappings for a binary's shared-library closure.
#[derive(Clone)]
pub struct ClosureAssembler {
    introspector: Arc<dyn Introspector>,
    sysroot: PathBuf,
    policy: DuplicatePolicy,
}

impl ClosureAssembler {
    pub fn new(introspector: Arc<dyn Introspector>) -> Self {
        Self {
            introspector,
            sysroot: PathBuf::from("/"),
            policy: DuplicatePolicy::default(),
        }
    }

    /// Sources under `sysroot` are installed relative to it.
    pub fn sysroot(mut self, sysroot: &Path) -> Self {
        self.sysroot = sysroot.to_path_buf();
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn closure(&self, artifact: &BinaryArtifact) -> Result<Vec<InstallMapping>> {
        let graph = self.discover(artifact)?;
        self.plan(&graph)
    }

    pub async fn closure_concurrent(&self, artifact: &BinaryArtifact) -> Result<Vec<InstallMapping>> {
        let graph = self.discover_concurrent(artifact).await?;
        self.plan(&graph)
    }

    /// Breadth-first traversal with a visited set keyed by resolved path.
    pub fn discover(&self, artifact: &BinaryArtifact) -> Result<DependencyGraph> {
        let base = base_dir(artifact);
        let mut graph = DependencyGraph::new(&artifact.path);
        let mut visited = BTreeSet::from([artifact.path.clone()]);
        let mut queue = VecDeque::from([artifact.path.clone()]);

        while let Some(node) = queue.pop_front() {
            let deps = self.introspector.dependencies(&on_host(&base, &node))?;
            for dep in deps {
                if let Some(next) = graph.record(&node, dep) {
                    if visited.insert(next.clone()) {
                        queue.push_back(next);
                    }
                }
            }
        }

        Ok(graph)
    }

    /// Level-synchronous traversal: every node of a frontier is introspected
    /// on the blocking pool, results are merged in frontier order.
    pub async fn discover_concurrent(&self, artifact: &BinaryArtifact) -> Result<DependencyGraph> {
        let base = base_dir(artifact);
        let mut graph = DependencyGraph::new(&artifact.path);
        let mut visited = BTreeSet::from([artifact.path.clone()]);
        let mut frontier = vec![artifact.path.clone()];

        while !frontier.is_empty() {
            let tasks: Vec<_> = frontier
                .iter()
                .map(|node| {
                    let introspector = Arc::clone(&self.introspector);
                    let target = on_host(&base, node);
                    tokio::task::spawn_blocking(move || introspector.dependencies(&target))
                })
                .collect();

            let mut next = Vec::new();
            for (node, task) in frontier.iter().zip(tasks) {
                let deps = task.await.map_err(|e| AssembleError::Introspection {
                    path: node.clone(),
                    reason: e.to_string(),
                })??;
                for dep in deps {
                    if let Some(path) = graph.record(node, dep) {
                        if visited.insert(path.clone()) {
                            next.push(path);
                        }
                    }
                }
            }
            frontier = next;
        }

        Ok(graph)
    }

    /// Turn a complete graph into one install mapping per identifier.
    pub fn plan(&self, graph: &DependencyGraph) -> Result<Vec<InstallMapping>> {
        if let Some(missing) = graph.unresolved().next() {
            return Err(AssembleError::UnresolvedDependency {
                library: missing.identifier.clone(),
                requested_by: missing
                    .requested_by
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| graph.root.clone()),
            });
        }

        // References iterate in (identifier, path) order, so the first one
        // seen per identifier is the lexicographic winner.
        //
        // Discarding a candidate does not prune its subtree: libraries that
        // were reached only through a discarded copy stay in the closure.
        // They are installed even though the kept copy may never load them.
        let mut chosen: BTreeMap<&str, InstallMapping> = BTreeMap::new();
        for reference in graph.references.values() {
            match chosen.entry(reference.identifier.as_str()) {
                Entry::Vacant(slot) => {
                    slot.insert(InstallMapping {
                        identifier: reference.identifier.clone(),
                        source: reference.resolved_path.clone(),
                        destination: install_destination(
                            &reference.identifier,
                            &reference.resolved_path,
                            &self.sysroot,
                        ),
                    });
                }
                Entry::Occupied(kept) => match self.policy {
                    DuplicatePolicy::FirstSorted => eprintln!(
                        "  [WARN] {}: using {}, ignoring {}",
                        reference.identifier,
                        kept.get().source.display(),
                        reference.resolved_path.display()
                    ),
                    DuplicatePolicy::Reject => {
                        return Err(AssembleError::AmbiguousInstallPath {
                            identifier: reference.identifier.clone(),
                            destination: kept.get().destination.clone(),
                            first: kept.get().source.clone(),
                            second: reference.resolved_path.clone(),
                        })
                    }
                },
            }
        }

        // Different identifiers may alias one file (same source, fine), but
        // two different files may never claim one destination.
        let mut claimed: BTreeMap<&Path, &InstallMapping> = BTreeMap::new();
        for mapping in chosen.values() {
            if let Some(previous) = claimed.insert(&mapping.destination, mapping) {
                if previous.source != mapping.source {
                    return Err(AssembleError::AmbiguousInstallPath {
                        identifier: mapping.identifier.clone(),
                        destination: mapping.destination.clone(),
                        first: previous.source.clone(),
                        second: mapping.source.clone(),
                    });
                }
            }
        }

        Ok(chosen.into_values().collect())
    }
}

/// Relative library paths are relative to the binary's directory.
fn base_dir(artifact: &BinaryArtifact) -> PathBuf {
    artifact
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn on_host(base: &Path, node: &Path) -> PathBuf {
    if node.is_absolute() {
        node.to_path_buf()
    } else {
        base.join(node)
    }
}

/// Install path inside the image root.
///
/// Absolute sources keep their path (minus the sysroot prefix) so the
/// loader's search paths stay valid inside the image. Bare names land at the
/// image root under their identifier.
pub fn install_destination(identifier: &str, source: &Path, sysroot: &Path) -> PathBuf {
    if !source.is_absolute() {
        let name = Path::new(identifier)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(identifier));
        return Path::new("/").join(name);
    }
    let relative = if sysroot == Path::new("/") {
        source
    } else {
        source.strip_prefix(sysroot).unwrap_or(source)
    };
    normalize_absolute(relative)
}

/// Lexically normalize into an absolute path. `..` stops at the root, the
/// same way `/..` is `/` on a real filesystem.
pub(crate) fn normalize_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}
