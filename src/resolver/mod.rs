// src/resolver/mod.rs

//! Dependency graph construction and resolution.
//!
//! Given a set of requested packages, the resolver builds a graph of
//! packages, suggestions, installed packages, and the two virtual
//! runtime nodes, fills in dependency edges, and produces a
//! conflict-free install plan ordered root to leaf, so that reverse
//! iteration processes dependencies before their dependers.
//!
//! Resolution is a greedy, deterministic constraint-narrowing pass. It
//! never backtracks across version choices.

use crate::error::{Error, Result};
use crate::package::{is_reserved_pkg_name, PackageInfo};
use crate::version::{coerce_semver, normalize_tag, PackageVersion, VersionSpec};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::debug;

/// One step of a resolved install plan.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub info: PackageInfo,
    /// The concrete version (tag, branch, or commit) to install.
    pub version: String,
    /// True when the package is in the plan only because another
    /// package suggests it.
    pub is_suggestion: bool,
}

/// A node of the resolution graph. Edges live in the `dependers` and
/// `dependees` maps, keyed by the neighbor node's graph key; traversal
/// state is kept outside the nodes.
#[derive(Debug)]
pub struct DependencyNode {
    /// Absent only for the virtual runtime nodes.
    pub info: Option<PackageInfo>,
    /// Set when the caller asked for this package explicitly.
    pub requested_version: Option<PackageVersion>,
    /// Set when the package (or runtime) is already installed.
    pub installed_version: Option<PackageVersion>,
    /// name -> spec: name needs this node at spec.
    pub dependers: BTreeMap<String, VersionSpec>,
    /// name -> spec: this node needs name at spec.
    pub dependees: BTreeMap<String, VersionSpec>,
    pub is_suggestion: bool,
}

impl DependencyNode {
    fn new(info: Option<PackageInfo>) -> Self {
        Self {
            info,
            requested_version: None,
            installed_version: None,
            dependers: BTreeMap::new(),
            dependees: BTreeMap::new(),
            is_suggestion: false,
        }
    }
}

/// The resolution graph: an adjacency map keyed by qualified package
/// name (or a reserved virtual name), plus the ordered list of request
/// keys the traversal starts from.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
    requests: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Add a node for a package the caller explicitly requested.
    /// Returns the node's graph key.
    pub fn add_request(&mut self, info: PackageInfo, requested: PackageVersion) -> String {
        let key = info.package.qualified_name();
        let mut node = DependencyNode::new(Some(info));
        node.requested_version = Some(requested);
        self.nodes.insert(key.clone(), node);
        self.requests.push(key.clone());
        key
    }

    /// Add a virtual node (the host runtime or the package manager)
    /// carrying the introspected installed version.
    pub fn add_virtual(&mut self, name: &str, installed: PackageVersion) {
        let mut node = DependencyNode::new(None);
        node.installed_version = Some(installed);
        self.nodes.insert(name.to_string(), node);
    }

    /// Add a node for an installed package not already in the graph, or
    /// record the installed version on the existing node.
    pub fn add_installed(&mut self, info: PackageInfo, installed: PackageVersion) {
        let key = info.package.qualified_name();

        let node = self
            .nodes
            .entry(key)
            .or_insert_with(|| DependencyNode::new(Some(info)));
        node.installed_version = Some(installed);
    }

    /// Record the installed version on a node already in the graph.
    pub fn add_installed_version(&mut self, key: &str, installed: PackageVersion) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.installed_version = Some(installed);
        }
    }

    /// Grow the graph to the transitive closure of the current nodes'
    /// dependencies (and suggestions, unless ignored). `lookup` resolves
    /// a dependency shorthand to a `PackageInfo`; its error string names
    /// the reason the dependency is unusable.
    ///
    /// A dependency reached only through `suggests` edges is marked a
    /// suggestion; the mark is cleared permanently the first time a real
    /// `depends` edge into it appears.
    pub fn populate<F>(&mut self, ignore_suggestions: bool, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> std::result::Result<PackageInfo, String>,
    {
        let mut todo: VecDeque<String> = self.nodes.keys().cloned().collect();

        while let Some(key) = todo.pop_front() {
            let (is_suggestion, depends, suggests) = {
                let node = &self.nodes[&key];

                let Some(info) = node.info.as_ref() else {
                    continue;
                };

                let depends = info
                    .dependencies(false)
                    .map_err(|err| Error::Metadata(format!("package \"{key}\" has {err}")))?;

                let suggests = if ignore_suggestions {
                    BTreeMap::new()
                } else {
                    info.dependencies(true)
                        .map_err(|err| Error::Metadata(format!("package \"{key}\" has {err}")))?
                };

                (node.is_suggestion, depends, suggests)
            };

            let mut all_deps = depends.clone();
            all_deps.extend(suggests.clone());

            for dep_name in all_deps.keys() {
                if is_reserved_pkg_name(dep_name) {
                    // The virtual nodes are seeded separately.
                    continue;
                }

                let dep_is_suggestion = is_suggestion
                    || (suggests.contains_key(dep_name) && !depends.contains_key(dep_name));

                let info = lookup(dep_name).map_err(|err| {
                    Error::Metadata(format!(
                        "package \"{key}\" has invalid dependency \"{dep_name}\": {err}"
                    ))
                })?;

                let dep_key = info.package.qualified_name();
                debug!(dep = %dep_name, of = %key, resolved = %dep_key, "dependency resolved");

                if let Some(existing) = self.nodes.get_mut(&dep_key) {
                    if existing.is_suggestion && !dep_is_suggestion {
                        // A suggestion turned out to be required.
                        existing.is_suggestion = false;
                    }

                    continue;
                }

                let mut node = DependencyNode::new(Some(info));
                node.is_suggestion = dep_is_suggestion;
                self.nodes.insert(dep_key.clone(), node);
                todo.push_back(dep_key);
            }
        }

        Ok(())
    }

    /// Fill in the depender/dependee edges from every non-virtual node's
    /// metadata. Version specs are parsed exactly once, here.
    pub fn fill_edges(&mut self, ignore_suggestions: bool) -> Result<()> {
        let mut edges: Vec<(String, String, VersionSpec)> = Vec::new();

        for (key, node) in &self.nodes {
            let Some(info) = node.info.as_ref() else {
                continue;
            };

            let depends = info
                .dependencies(false)
                .map_err(|err| Error::Metadata(format!("package \"{key}\" has {err}")))?;

            let mut all_deps = depends;

            if !ignore_suggestions {
                let suggests = info
                    .dependencies(true)
                    .map_err(|err| Error::Metadata(format!("package \"{key}\" has {err}")))?;
                all_deps.extend(suggests);
            }

            for (dep_name, spec_text) in &all_deps {
                let spec = VersionSpec::parse(spec_text).map_err(|err| {
                    Error::Metadata(format!(
                        "package \"{key}\" has invalid version spec for \"{dep_name}\": {err}"
                    ))
                })?;

                if let Some(target) = self.find_node(dep_name) {
                    edges.push((key.clone(), target, spec));
                }
            }
        }

        for (depender, target, spec) in edges {
            if let Some(node) = self.nodes.get_mut(&target) {
                node.dependers.insert(depender.clone(), spec.clone());
            }

            if let Some(node) = self.nodes.get_mut(&depender) {
                node.dependees.insert(target, spec);
            }
        }

        Ok(())
    }

    /// Resolve a dependency shorthand to the key of a graph node. The
    /// reserved virtual names match their virtual nodes when present;
    /// everything else goes through qualified-name suffix matching.
    fn find_node(&self, dep_name: &str) -> Option<String> {
        if is_reserved_pkg_name(dep_name) {
            return self.contains(dep_name).then(|| dep_name.to_string());
        }

        for (key, node) in &self.nodes {
            let Some(info) = node.info.as_ref() else {
                continue;
            };

            if info.package.matches_path(dep_name) {
                return Some(key.clone());
            }
        }

        None
    }

    /// Solve for a conflict-free plan.
    ///
    /// Breadth-first traversal from the requested nodes, following
    /// dependee edges so only packages reachable from the actual
    /// requests are considered. Each node's dependee set is expanded
    /// into the worklist exactly once, which bounds total work to one
    /// pass per edge even with dependency cycles; node bodies may run
    /// more than once (diamonds), and the final reverse-scan dedup
    /// keeps only the deepest occurrence of each package.
    ///
    /// Already-installed packages and the requests themselves never
    /// appear in the returned plan.
    pub fn resolve(&self) -> Result<Vec<PlanEntry>> {
        let mut todo: VecDeque<&str> = self.requests.iter().map(String::as_str).collect();
        let mut expanded: HashSet<&str> = HashSet::new();
        let mut new_pkgs: Vec<PlanEntry> = Vec::new();

        while let Some(key) = todo.pop_front() {
            let node = &self.nodes[key];

            if expanded.insert(key) {
                for dependee in node.dependees.keys() {
                    todo.push_back(dependee);
                }
            }

            if node.dependers.is_empty() {
                if node.installed_version.is_some() || node.requested_version.is_some() {
                    // Nothing new to add for installed packages or
                    // direct requests that nothing depends on.
                    continue;
                }

                // A new package nothing depends on; take its own best
                // version.
                if let Some(info) = node.info.as_ref() {
                    new_pkgs.push(PlanEntry {
                        info: info.clone(),
                        version: info.best_version(),
                        is_suggestion: node.is_suggestion,
                    });
                }

                continue;
            }

            if let Some(requested) = node.requested_version.as_ref() {
                for (depender, spec) in &node.dependers {
                    if let Err(msg) = requested.fulfills(spec) {
                        return Err(Error::Conflict(format!(
                            "unsatisfiable dependency: requested \"{key}\" ({}), \
                             but \"{depender}\" requires {spec} ({msg})",
                            requested.version
                        )));
                    }
                }
            } else if let Some(installed) = node.installed_version.as_ref() {
                for (depender, spec) in &node.dependers {
                    if self.is_installed_unrequested(depender) {
                        // Two already-installed packages are assumed
                        // mutually compatible even when the constraint
                        // cannot be verified, so that installs done with
                        // dependency checks skipped do not poison later
                        // resolutions.
                        continue;
                    }

                    if let Err(msg) = installed.fulfills(spec) {
                        return Err(Error::Conflict(format!(
                            "unsatisfiable dependency: \"{key}\" ({}) is installed, \
                             but \"{depender}\" requires {spec} ({msg})",
                            installed.version
                        )));
                    }
                }
            } else {
                let info = node
                    .info
                    .as_ref()
                    .ok_or_else(|| Error::Conflict(format!("\"{key}\" has no package info")))?;
                let version = self.best_satisfying_version(key, node, info)?;

                new_pkgs.push(PlanEntry {
                    info: info.clone(),
                    version,
                    is_suggestion: node.is_suggestion,
                });
            }
        }

        // Deduplicate, keeping the deepest occurrence of each package so
        // the final list never names a package before its dependencies.
        let mut seen: HashSet<String> = HashSet::new();
        let mut plan: Vec<PlanEntry> = Vec::new();

        for entry in new_pkgs.into_iter().rev() {
            if seen.insert(entry.info.package.name.clone()) {
                plan.insert(0, entry);
            }
        }

        Ok(plan)
    }

    fn is_installed_unrequested(&self, key: &str) -> bool {
        self.nodes
            .get(key)
            .map(|n| n.installed_version.is_some() && n.requested_version.is_none())
            .unwrap_or(false)
    }

    /// The best version of an unresolved dependency that satisfies
    /// every depender's spec.
    fn best_satisfying_version(
        &self,
        key: &str,
        node: &DependencyNode,
        info: &PackageInfo,
    ) -> Result<String> {
        let no_best_version = || {
            let mut msg = format!("\"{key}\" has no version satisfying dependencies:\n");

            for (depender, spec) in &node.dependers {
                msg.push_str(&format!("\t\"{depender}\" requires: \"{spec}\"\n"));
            }

            Error::Conflict(msg)
        };

        let mut branch_demands: Vec<&str> = Vec::new();
        let mut version_demands = false;

        for spec in node.dependers.values() {
            match spec {
                VersionSpec::Any => {}
                VersionSpec::Branch(name) => branch_demands.push(name),
                VersionSpec::Exact(_) => version_demands = true,
            }
        }

        if !branch_demands.is_empty() {
            // Branch and version demands together are unsatisfiable, and
            // all branch demands must agree.
            if version_demands {
                return Err(no_best_version());
            }

            let branch = branch_demands[0];

            if branch_demands.iter().any(|b| *b != branch) {
                return Err(no_best_version());
            }

            return Ok(branch.to_string());
        }

        if version_demands {
            for tag in info.versions.iter().rev() {
                let Some(candidate) = coerce_semver(normalize_tag(tag)) else {
                    continue;
                };

                let satisfied = node.dependers.values().all(|spec| match spec {
                    VersionSpec::Exact(req) => req.matches(&candidate),
                    _ => true,
                });

                if satisfied {
                    return Ok(tag.clone());
                }
            }

            return Err(no_best_version());
        }

        // All wildcards.
        Ok(info.best_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Metadata, Package, PackageInfo};
    use crate::version::TrackingMethod;
    use std::collections::BTreeMap;

    fn info(dir_and_name: &str, versions: &[&str], depends: &str, suggests: &str) -> PackageInfo {
        let mut fields = BTreeMap::new();

        if !depends.is_empty() {
            fields.insert("depends".to_string(), depends.to_string());
        }

        if !suggests.is_empty() {
            fields.insert("suggests".to_string(), suggests.to_string());
        }

        let metadata = Metadata::new(fields);
        let (directory, _) = dir_and_name.rsplit_once('/').unwrap_or(("", dir_and_name));
        let package = Package::from_source(
            &format!("https://example.com/{dir_and_name}"),
            "zeal",
            directory,
            metadata.clone(),
        );

        let versions: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        let metadata_version = versions.last().cloned().unwrap_or_else(|| "main".to_string());

        PackageInfo {
            package,
            status: None,
            metadata,
            versions,
            default_branch: "main".to_string(),
            version_type: TrackingMethod::Version,
            metadata_version,
            invalid_reason: None,
        }
    }

    fn requested(info: &PackageInfo) -> PackageVersion {
        PackageVersion::new(TrackingMethod::Version, info.best_version())
    }

    /// Populate with a fixed universe of packages, resolving dependency
    /// names by suffix match the way the registry would.
    fn populate_from(
        graph: &mut DependencyGraph,
        universe: &[PackageInfo],
        ignore_suggestions: bool,
    ) -> Result<()> {
        let universe = universe.to_vec();
        graph.populate(ignore_suggestions, move |name| {
            universe
                .iter()
                .find(|i| i.package.matches_path(name))
                .cloned()
                .ok_or_else(|| format!("package \"{name}\" not found"))
        })
    }

    fn plan_names(plan: &[PlanEntry]) -> Vec<String> {
        plan.iter().map(|e| e.info.package.name.clone()).collect()
    }

    #[test]
    fn test_requested_roots_excluded_from_plan() {
        let foo = info("alice/foo", &["1.0.0"], "", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(foo.clone(), requested(&foo));
        populate_from(&mut graph, &[foo], false).unwrap();
        graph.fill_edges(false).unwrap();

        assert!(graph.resolve().unwrap().is_empty());
    }

    #[test]
    fn test_single_dependency_resolved_at_newest_tag() {
        let bar = info("alice/bar", &["0.9.0", "1.0.0", "1.2.0"], "", "");
        let foo = info("alice/foo", &["1.0.0"], "bar >=1.0.0", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(foo.clone(), requested(&foo));
        populate_from(&mut graph, &[foo, bar], false).unwrap();
        graph.fill_edges(false).unwrap();

        let plan = graph.resolve().unwrap();
        assert_eq!(plan_names(&plan), vec!["bar"]);
        assert_eq!(plan[0].version, "1.2.0");
        assert!(!plan[0].is_suggestion);
    }

    #[test]
    fn test_conflict_names_both_parties() {
        let b = info("alice/b", &["1.0.0", "2.0.0"], "", "");
        let a = info("alice/a", &["2.0.0"], "b >=1.0.0,<2.0.0", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        graph.add_request(
            b.clone(),
            PackageVersion::new(TrackingMethod::Version, "2.0.0"),
        );
        populate_from(&mut graph, &[a, b], false).unwrap();
        graph.fill_edges(false).unwrap();

        let err = graph.resolve().unwrap_err().to_string();
        assert!(err.contains("zeal/alice/b"), "{err}");
        assert!(err.contains("zeal/alice/a"), "{err}");
        assert!(err.contains("2.0.0"), "{err}");
    }

    #[test]
    fn test_suggestion_weakening() {
        let b = info("alice/b", &["1.0.0"], "", "");
        let a = info("alice/a", &["1.0.0"], "", "b *");
        let c = info("alice/c", &["1.0.0"], "b *", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        graph.add_request(c.clone(), requested(&c));
        populate_from(&mut graph, &[a, b, c], false).unwrap();
        graph.fill_edges(false).unwrap();

        let plan = graph.resolve().unwrap();
        assert_eq!(plan_names(&plan), vec!["b"]);
        assert!(!plan[0].is_suggestion);
    }

    #[test]
    fn test_suggestion_of_suggestion_stays_suggestion() {
        let c = info("alice/c", &["1.0.0"], "", "");
        let b = info("alice/b", &["1.0.0"], "c *", "");
        let a = info("alice/a", &["1.0.0"], "", "b *");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b, c], false).unwrap();
        graph.fill_edges(false).unwrap();

        let plan = graph.resolve().unwrap();
        assert_eq!(plan_names(&plan), vec!["b", "c"]);
        assert!(plan.iter().all(|e| e.is_suggestion));
    }

    #[test]
    fn test_ignore_suggestions() {
        let b = info("alice/b", &["1.0.0"], "", "");
        let a = info("alice/a", &["1.0.0"], "", "b *");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b], true).unwrap();
        graph.fill_edges(true).unwrap();

        assert!(graph.resolve().unwrap().is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let a = info("alice/a", &["1.0.0"], "b *", "");
        let b = info("alice/b", &["1.0.0"], "a *", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b], false).unwrap();
        graph.fill_edges(false).unwrap();

        let plan = graph.resolve().unwrap();
        assert_eq!(plan_names(&plan), vec!["b"]);
    }

    #[test]
    fn test_diamond_orders_shared_dependency_last() {
        let d = info("alice/d", &["1.0.0"], "", "");
        let b = info("alice/b", &["1.0.0"], "d *", "");
        let c = info("alice/c", &["1.0.0"], "d *", "");
        let a = info("alice/a", &["1.0.0"], "b * c *", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b, c, d], false).unwrap();
        graph.fill_edges(false).unwrap();

        let plan = graph.resolve().unwrap();
        let names = plan_names(&plan);
        let pos = |n: &str| names.iter().position(|x| x == n).unwrap();
        assert_eq!(names.len(), 3);
        assert!(pos("d") > pos("b"));
        assert!(pos("d") > pos("c"));
    }

    #[test]
    fn test_installed_version_conflict() {
        let b = info("alice/b", &["1.0.0"], "", "");
        let a = info("alice/a", &["1.0.0"], "b >=2.0.0", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b.clone()], false).unwrap();
        graph.add_installed(b, PackageVersion::new(TrackingMethod::Version, "1.0.0"));
        graph.fill_edges(false).unwrap();

        let err = graph.resolve().unwrap_err().to_string();
        assert!(err.contains("is installed"), "{err}");
        assert!(err.contains("zeal/alice/a"), "{err}");
    }

    #[test]
    fn test_installed_dependers_are_exempt() {
        // x (installed) requires b >=2.0.0, b installed at 1.0.0. Since
        // x is itself installed and not requested, the stale constraint
        // is tolerated.
        let b = info("alice/b", &["1.0.0"], "", "");
        let x = info("alice/x", &["1.0.0"], "b >=2.0.0", "");
        let a = info("alice/a", &["1.0.0"], "b *", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b.clone(), x.clone()], false).unwrap();
        graph.add_installed(b, PackageVersion::new(TrackingMethod::Version, "1.0.0"));
        graph.add_installed(x, PackageVersion::new(TrackingMethod::Version, "1.0.0"));
        graph.fill_edges(false).unwrap();

        assert!(graph.resolve().unwrap().is_empty());
    }

    #[test]
    fn test_virtual_runtime_version_checked() {
        let a = info("alice/a", &["1.0.0"], "runtime >=7.0.0", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a], false).unwrap();
        graph.add_virtual(
            "runtime",
            PackageVersion::new(TrackingMethod::Version, "6.2.0"),
        );
        graph.fill_edges(false).unwrap();

        let err = graph.resolve().unwrap_err().to_string();
        assert!(err.contains("runtime"), "{err}");
        assert!(err.contains("6.2.0"), "{err}");
    }

    #[test]
    fn test_version_selection_scans_newest_first() {
        let b = info("alice/b", &["1.0.0", "1.5.0", "2.0.0"], "", "");
        let a = info("alice/a", &["1.0.0"], "b <2.0.0", "");
        let c = info("alice/c", &["1.0.0"], "b >=1.2.0", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        graph.add_request(c.clone(), requested(&c));
        populate_from(&mut graph, &[a, b, c], false).unwrap();
        graph.fill_edges(false).unwrap();

        let plan = graph.resolve().unwrap();
        assert_eq!(plan_names(&plan), vec!["b"]);
        assert_eq!(plan[0].version, "1.5.0");
    }

    #[test]
    fn test_branch_demands_must_agree() {
        let b = info("alice/b", &[], "", "");
        let a = info("alice/a", &["1.0.0"], "b branch=dev", "");
        let c = info("alice/c", &["1.0.0"], "b branch=main", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        graph.add_request(c.clone(), requested(&c));
        populate_from(&mut graph, &[a.clone(), b.clone(), c.clone()], false).unwrap();
        graph.fill_edges(false).unwrap();

        let err = graph.resolve().unwrap_err().to_string();
        assert!(err.contains("no version satisfying"), "{err}");

        // Agreeing branch demands pick that branch.
        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b], false).unwrap();
        graph.fill_edges(false).unwrap();

        let plan = graph.resolve().unwrap();
        assert_eq!(plan[0].version, "dev");
    }

    #[test]
    fn test_branch_and_version_demands_unsatisfiable() {
        let b = info("alice/b", &["1.0.0"], "", "");
        let a = info("alice/a", &["1.0.0"], "b branch=dev", "");
        let c = info("alice/c", &["1.0.0"], "b >=1.0.0", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        graph.add_request(c.clone(), requested(&c));
        populate_from(&mut graph, &[a, b, c], false).unwrap();
        graph.fill_edges(false).unwrap();

        assert!(graph.resolve().is_err());
    }

    #[test]
    fn test_wildcard_dependency_uses_default_branch_without_tags() {
        let b = info("alice/b", &[], "", "");
        let a = info("alice/a", &["1.0.0"], "b *", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b], false).unwrap();
        graph.fill_edges(false).unwrap();

        let plan = graph.resolve().unwrap();
        assert_eq!(plan[0].version, "main");
    }

    #[test]
    fn test_malformed_depends_aborts() {
        let a = info("alice/a", &["1.0.0"], "b", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        let err = populate_from(&mut graph, &[a], false)
            .unwrap_err()
            .to_string();
        assert!(err.contains("malformed"), "{err}");
    }

    #[test]
    fn test_invalid_spec_detected_at_edge_fill() {
        let b = info("alice/b", &["1.0.0"], "", "");
        let a = info("alice/a", &["1.0.0"], "b not-a-spec", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        populate_from(&mut graph, &[a, b], false).unwrap();

        let err = graph.fill_edges(false).unwrap_err().to_string();
        assert!(err.contains("invalid version spec"), "{err}");
    }

    #[test]
    fn test_unknown_dependency_reported_with_referrer() {
        let a = info("alice/a", &["1.0.0"], "ghost *", "");

        let mut graph = DependencyGraph::new();
        graph.add_request(a.clone(), requested(&a));
        let err = populate_from(&mut graph, &[a], false)
            .unwrap_err()
            .to_string();
        assert!(err.contains("ghost"), "{err}");
        assert!(err.contains("zeal/alice/a"), "{err}");
    }
}
