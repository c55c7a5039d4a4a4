// src/manager/mod.rs

//! The install/upgrade/lifecycle engine.
//!
//! A `Manager` owns the state directory layout, the configured sources,
//! the installed-package map read from the manifest, and the cache of
//! built-in runtime packages. Every state-mutating operation rewrites
//! the manifest after it succeeds; staging failures leave the manifest
//! untouched.
//!
//! The engine is single-threaded and synchronous. Concurrent
//! invocations against the same state directory must be serialized by
//! the caller.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::git;
use crate::manifest::Manifest;
use crate::metadata::{interpolate_metadata, parse_package_metadata, pick_metadata_file};
use crate::package::{
    canonical_url, is_reserved_pkg_name, InstalledPackage, Metadata, Package, PackageInfo,
    PackageStatus, GROVE_PKG_NAME, RUNTIME_PKG_NAME,
};
use crate::resolver::{DependencyGraph, PlanEntry};
use crate::source::{validate_source_name, Source};
use crate::version::{
    normalize_tag, ordered_version_tags, PackageVersion, TrackingMethod,
};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Name of the manifest document within the state directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Autoloader listing written into the staged script directory.
pub const AUTOLOADER_FILENAME: &str = "packages.load";

/// Script entry point a package must provide to be loadable as
/// scripts.
pub const SCRIPT_ENTRY: &str = "__load__.gv";

/// Marker file identifying a staged plugin, and its disabled form.
pub const PLUGIN_MAGIC: &str = "__plugin__";
pub const PLUGIN_MAGIC_DISABLED: &str = "__plugin__.disabled";

pub struct Manager {
    state_dir: PathBuf,
    source_clone_dir: PathBuf,
    package_clone_dir: PathBuf,
    scratch_dir: PathBuf,
    log_dir: PathBuf,
    bin_dir: PathBuf,
    /// Staging area for package scripts: `<configured script_dir>/packages`.
    script_dir: PathBuf,
    /// Staging area for built plugins: `<configured plugin_dir>/packages`.
    plugin_dir: PathBuf,
    manifest_path: PathBuf,

    sources: BTreeMap<String, Source>,
    /// Installed packages from the manifest, keyed by package name.
    installed: BTreeMap<String, InstalledPackage>,

    /// Built-in runtime packages, discovered once per instance.
    builtins: Option<Vec<PackageInfo>>,
    runtime_exe: Option<String>,
    runtime_version: Option<String>,
    user_vars: BTreeMap<String, String>,
}

impl Manager {
    /// Create an engine over a state directory, reading the manifest
    /// and relocating staged content if the configured paths changed
    /// since the last run. Sources named in the configuration are
    /// opened (cloning on first use).
    pub fn new(config: &Config) -> Result<Self> {
        let state_dir = config.state_dir().to_path_buf();
        let script_root = config.script_dir();
        let plugin_root = config.plugin_dir();

        let mut manager = Self {
            source_clone_dir: state_dir.join("clones").join("source"),
            package_clone_dir: state_dir.join("clones").join("package"),
            scratch_dir: state_dir.join("scratch"),
            log_dir: state_dir.join("logs"),
            bin_dir: config.bin_dir(),
            script_dir: script_root.join("packages"),
            plugin_dir: plugin_root.join("packages"),
            manifest_path: state_dir.join(MANIFEST_FILENAME),
            state_dir,
            sources: BTreeMap::new(),
            installed: BTreeMap::new(),
            builtins: None,
            runtime_exe: config.runtime.exe.clone(),
            runtime_version: config.runtime.version.clone(),
            user_vars: config.user_vars.clone(),
        };

        for dir in [
            &manager.state_dir,
            &manager.source_clone_dir,
            &manager.package_clone_dir,
            &manager.scratch_dir,
            &manager.log_dir,
            &manager.bin_dir,
            &manager.script_dir,
            &manager.plugin_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }

        manager.read_manifest()?;

        for (name, url) in &config.sources {
            manager.add_source(name, url)?;
        }

        Ok(manager)
    }

    fn read_manifest(&mut self) -> Result<()> {
        let Some(manifest) = Manifest::read(&self.manifest_path)? else {
            return Ok(());
        };

        self.relocate_if_moved(&manifest)?;
        self.installed = manifest.package_map();
        Ok(())
    }

    /// One-time migration: when the manifest records different staged
    /// paths than the current configuration, move the existing content
    /// before any operation runs.
    fn relocate_if_moved(&self, manifest: &Manifest) -> Result<()> {
        let moves = [
            (&manifest.script_dir, &self.script_dir),
            (&manifest.plugin_dir, &self.plugin_dir),
            (&manifest.bin_dir, &self.bin_dir),
        ];

        for (recorded, configured) in moves {
            if recorded.is_empty() {
                continue;
            }

            let recorded = PathBuf::from(recorded);

            if &recorded == configured || !recorded.exists() {
                continue;
            }

            info!(
                from = %recorded.display(),
                to = %configured.display(),
                "relocating staged content"
            );
            move_dir_contents(&recorded, configured)?;
        }

        Ok(())
    }

    fn write_manifest(&self) -> Result<()> {
        let mut manifest = Manifest::new(
            &self.script_dir.to_string_lossy(),
            &self.plugin_dir.to_string_lossy(),
            &self.bin_dir.to_string_lossy(),
        );

        // Built-ins are injected at runtime, never persisted.
        manifest.installed_packages = self.installed.values().cloned().collect();
        manifest.write(&self.manifest_path)
    }

    // ------------------------------------------------------------------
    // Sources

    /// Register a package source, cloning its listing repository. A
    /// name already bound to a different URL is a conflict; re-adding
    /// the same binding is a no-op.
    pub fn add_source(&mut self, name: &str, url: &str) -> Result<()> {
        validate_source_name(name)?;

        if is_reserved_pkg_name(name) {
            return Err(Error::Config(format!("source name \"{name}\" is reserved")));
        }

        let url = canonical_url(url);

        if let Some(existing) = self.sources.get(name) {
            if existing.git_url == url {
                return Ok(());
            }

            return Err(Error::Conflict(format!(
                "source \"{name}\" already bound to {}",
                existing.git_url
            )));
        }

        let clone_path = self.source_clone_dir.join(name);
        let source = Source::new(name, &url, &clone_path)?;
        self.sources.insert(name.to_string(), source);
        Ok(())
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    /// Fetch and fast-forward one source's listing.
    pub fn refresh_source(&self, name: &str) -> Result<()> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("no such source \"{name}\"")))?;
        source.refresh()
    }

    /// Every package listed by every source.
    pub fn source_packages(&self) -> Result<Vec<Package>> {
        let mut packages = Vec::new();

        for source in self.sources.values() {
            packages.extend(source.packages()?);
        }

        Ok(packages)
    }

    /// All source packages matching a user-supplied shorthand.
    pub fn match_source_packages(&self, pkg_path: &str) -> Result<Vec<Package>> {
        let path = canonical_url(pkg_path);
        Ok(self
            .source_packages()?
            .into_iter()
            .filter(|p| p.matches_path(&path))
            .collect())
    }

    // ------------------------------------------------------------------
    // Installed state

    /// Installed packages, built-ins included.
    pub fn installed_packages(&self) -> Vec<InstalledPackage> {
        let mut packages: Vec<InstalledPackage> = self.installed.values().cloned().collect();
        packages.extend(self.builtin_installed());
        packages
    }

    pub fn loaded_packages(&self) -> Vec<InstalledPackage> {
        self.installed_packages()
            .into_iter()
            .filter(|p| p.status.is_loaded)
            .collect()
    }

    /// Resolve a user-supplied shorthand against the installed set.
    pub fn find_installed_package(&self, pkg_path: &str) -> Option<InstalledPackage> {
        let path = canonical_url(pkg_path);

        self.installed_packages()
            .into_iter()
            .find(|p| p.package.matches_path(&path))
    }

    /// Installed packages whose `depends` field references `name`.
    pub fn list_depender_pkgs(&self, pkg_path: &str) -> Vec<InstalledPackage> {
        let Some(target) = self.find_installed_package(pkg_path) else {
            return Vec::new();
        };

        let mut dependers = Vec::new();

        for ipkg in self.installed_packages() {
            if ipkg.package.name == target.package.name {
                continue;
            }

            let Ok(deps) = ipkg.package.metadata.depends() else {
                continue;
            };

            if deps.keys().any(|dep| target.package.matches_path(dep)) {
                dependers.push(ipkg);
            }
        }

        dependers
    }

    /// Names of the installed packages an installed package depends on.
    pub fn installed_package_dependencies(&self, ipkg: &InstalledPackage) -> Vec<String> {
        let Ok(deps) = ipkg.package.metadata.depends() else {
            return Vec::new();
        };

        let mut names = Vec::new();

        for dep in deps.keys() {
            if is_reserved_pkg_name(dep) {
                continue;
            }

            if let Some(found) = self.find_installed_package(dep) {
                names.push(found.package.name);
            }
        }

        names
    }

    // ------------------------------------------------------------------
    // Built-in packages and runtime introspection

    /// Packages compiled into the host runtime, reported by its
    /// `--build-info` JSON under `grove.provides`. Discovery is
    /// best-effort: a missing or uncooperative runtime yields an empty
    /// set, never an error.
    pub fn discover_builtin_packages(&mut self) -> &[PackageInfo] {
        if self.builtins.is_none() {
            let found = self.query_build_info().unwrap_or_default();

            if !found.is_empty() {
                debug!(count = found.len(), "discovered built-in packages");
            }

            self.builtins = Some(found);
        }

        self.builtins.as_deref().unwrap_or_default()
    }

    fn query_build_info(&mut self) -> Option<Vec<PackageInfo>> {
        let exe = self.runtime_exe.clone()?;

        let output = match Command::new(&exe).arg("--build-info").output() {
            Ok(output) if output.status.success() => output,
            Ok(_) | Err(_) => {
                warn!(%exe, "runtime build-info query failed");
                return None;
            }
        };

        let doc: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;

        if self.runtime_version.is_none() {
            self.runtime_version = doc
                .get("version")
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }

        let provides = doc.get("grove")?.get("provides")?.as_array()?;
        let mut infos = Vec::new();

        for entry in provides {
            let name = entry.get("name").and_then(|v| v.as_str())?;
            let version = entry.get("version").and_then(|v| v.as_str()).unwrap_or("");
            let commit = entry.get("commit").and_then(|v| v.as_str()).unwrap_or("");
            infos.push(PackageInfo::builtin(name, version, commit));
        }

        Some(infos)
    }

    /// A built-in package matching a dependency shorthand.
    pub fn find_builtin_package(&mut self, pkg_path: &str) -> Option<PackageInfo> {
        let path = canonical_url(pkg_path);
        self.discover_builtin_packages()
            .iter()
            .find(|i| i.package.matches_path(&path))
            .cloned()
    }

    fn builtin_installed(&self) -> Vec<InstalledPackage> {
        self.builtins
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|i| {
                i.status.as_ref().map(|status| InstalledPackage {
                    package: i.package.clone(),
                    status: status.clone(),
                })
            })
            .collect()
    }

    /// The host runtime version, from configuration or the runtime's
    /// own build info.
    pub fn runtime_version(&mut self) -> Option<String> {
        if self.runtime_version.is_none() {
            self.discover_builtin_packages();
        }

        self.runtime_version.clone()
    }

    // ------------------------------------------------------------------
    // Inspection

    /// Resolve a shorthand or URL to a `PackageInfo` snapshot at a
    /// candidate version, cloning into scratch space as needed. Lookup
    /// failures (zero or many matches) are hard errors; per-package
    /// validation problems come back inside the snapshot's
    /// `invalid_reason`.
    pub fn info(&mut self, pkg_path: &str, version: &str, prefer_installed: bool) -> Result<PackageInfo> {
        if prefer_installed {
            if let Some(ipkg) = self.find_installed_package(pkg_path) {
                if ipkg.is_builtin() {
                    if let Some(info) = self.find_builtin_package(pkg_path) {
                        return Ok(info);
                    }
                }

                let clone_path = self.package_clone_dir.join(&ipkg.package.name);
                return self.info_from_clone(ipkg.package.clone(), &clone_path, "", Some(ipkg.status));
            }
        }

        if let Some(info) = self.find_builtin_package(pkg_path) {
            return Ok(info);
        }

        let package = self.resolve_candidate(pkg_path)?;
        self.scratch_info(package, version)
    }

    /// Resolve a shorthand to exactly one not-yet-installed candidate
    /// package, falling back to treating the input as a repository URL.
    fn resolve_candidate(&self, pkg_path: &str) -> Result<Package> {
        let matches = self.match_source_packages(pkg_path)?;

        match matches.len() {
            1 => Ok(matches.into_iter().next().ok_or_else(|| {
                Error::NotFound(format!("package \"{pkg_path}\" not found"))
            })?),
            0 => {
                let path = canonical_url(pkg_path);

                // A bare name matches nothing; anything path-shaped is
                // tried as a direct repository URL.
                if path.contains('/') {
                    Ok(Package::from_url(&path))
                } else {
                    Err(Error::NotFound(format!("package \"{pkg_path}\" not found")))
                }
            }
            _ => {
                let names: Vec<String> =
                    matches.iter().map(|p| p.qualified_name()).collect();
                Err(Error::Ambiguous(format!(
                    "\"{pkg_path}\" is ambiguous, matches: {}",
                    names.join(", ")
                )))
            }
        }
    }

    /// Clone into scratch and snapshot the package at `version`.
    fn scratch_info(&mut self, package: Package, version: &str) -> Result<PackageInfo> {
        let clone_path = self.scratch_dir.join("info").join(&package.name);

        if clone_path.exists() {
            std::fs::remove_dir_all(&clone_path)?;
        }

        let shallow = !looks_like_commit_hash(version);

        if let Err(err) = git::clone(&package.git_url, &clone_path, shallow) {
            return Ok(PackageInfo::invalid(package, format!("failed to clone: {err}")));
        }

        let status = self
            .find_installed_package(&package.qualified_name())
            .map(|ipkg| ipkg.status);
        self.info_from_clone(package, &clone_path, version, status)
    }

    /// Snapshot a package from an existing clone. An empty `version`
    /// inspects the latest tag, else the default branch.
    fn info_from_clone(
        &mut self,
        package: Package,
        clone_path: &Path,
        version: &str,
        status: Option<PackageStatus>,
    ) -> Result<PackageInfo> {
        let repo = git::open(clone_path)?;
        let versions = ordered_version_tags(git::tag_names(&repo)?);
        let default_branch = git::default_branch(&repo)?;

        let metadata_version = if version.is_empty() {
            match &status {
                Some(s) if !s.current_version.is_empty() => s.current_version.clone(),
                _ => versions
                    .last()
                    .cloned()
                    .unwrap_or_else(|| default_branch.clone()),
            }
        } else {
            version.to_string()
        };

        let version_type = classify_version(&repo, &metadata_version, &versions, &default_branch);

        if git::checkout(&repo, &metadata_version).is_err() {
            return Ok(PackageInfo::invalid(
                package,
                format!("no such commit, tag, or branch \"{metadata_version}\""),
            ));
        }

        let metadata = match self.read_metadata(&package, clone_path) {
            Ok(metadata) => metadata,
            Err(reason) => return Ok(PackageInfo::invalid(package, reason)),
        };

        let mut package = package;
        package.metadata = metadata.clone();

        Ok(PackageInfo {
            package,
            status,
            metadata,
            versions,
            default_branch,
            metadata_version,
            version_type,
            invalid_reason: None,
        })
    }

    fn read_metadata(
        &self,
        package: &Package,
        clone_path: &Path,
    ) -> std::result::Result<Metadata, String> {
        let file = pick_metadata_file(clone_path);
        let metadata = parse_package_metadata(&file)?;

        let runtime_dist = self.runtime_version.clone().unwrap_or_default();
        interpolate_metadata(
            &metadata,
            &runtime_dist,
            &self.package_clone_dir.to_string_lossy(),
            &self.user_vars,
        )
    }

    /// The ordered version tags of a package's repository.
    pub fn package_versions(&mut self, pkg_path: &str) -> Result<Vec<String>> {
        let info = self.info(pkg_path, "", true)?;

        if let Some(reason) = info.invalid_reason {
            return Err(Error::Metadata(reason));
        }

        Ok(info.versions)
    }

    // ------------------------------------------------------------------
    // Dependency validation

    /// Validate the dependencies of a set of requested `(name, version)`
    /// pairs and return the additional packages an install would need,
    /// ordered root to leaf. See the resolver module for the ordering
    /// contract.
    pub fn validate_dependencies(
        &mut self,
        requested: &[(String, String)],
        ignore_installed: bool,
        ignore_suggestions: bool,
    ) -> Result<Vec<PlanEntry>> {
        let mut graph = DependencyGraph::new();

        for (name, version) in requested {
            let info = self.info(name, version, false)?;

            if let Some(reason) = info.invalid_reason {
                return Err(Error::Metadata(format!(
                    "invalid package \"{name}\": {reason}"
                )));
            }

            let version = if version.is_empty() {
                info.best_version()
            } else {
                version.clone()
            };

            let requested_version = PackageVersion::new(info.version_type, version);
            graph.add_request(info, requested_version);
        }

        // Make sure the builtin cache is warm before the closure below
        // borrows self mutably.
        self.discover_builtin_packages();

        {
            let manager = &mut *self;
            graph.populate(ignore_suggestions, |dep_name| {
                if let Some(info) = manager.find_builtin_package(dep_name) {
                    return Ok(info);
                }

                let info = manager
                    .info(dep_name, "", false)
                    .map_err(|err| err.to_string())?;

                match info.invalid_reason {
                    Some(reason) => Err(reason),
                    None => Ok(info),
                }
            })?;
        }

        if !ignore_installed {
            if let Some(runtime_version) = self.runtime_version() {
                graph.add_virtual(
                    RUNTIME_PKG_NAME,
                    PackageVersion::new(TrackingMethod::Version, runtime_version),
                );
            } else {
                warn!("could not determine runtime version, skipping runtime node");
            }

            graph.add_virtual(
                GROVE_PKG_NAME,
                PackageVersion::new(TrackingMethod::Version, env!("CARGO_PKG_VERSION")),
            );

            for ipkg in self.installed_packages() {
                let key = ipkg.package.qualified_name();
                let installed_version = PackageVersion::new(
                    ipkg.status.tracking_method.unwrap_or(TrackingMethod::Branch),
                    ipkg.status.current_version.clone(),
                );

                if graph.contains(&key) {
                    graph.add_installed_version(&key, installed_version);
                    continue;
                }

                let info = if ipkg.is_builtin() {
                    self.find_builtin_package(&key)
                } else {
                    self.info(&key, "", true).ok().filter(|i| i.invalid_reason.is_none())
                };

                let Some(info) = info else {
                    warn!(package = %key, "skipping uninspectable installed package");
                    continue;
                };

                graph.add_installed(info, installed_version);
            }
        }

        graph.fill_edges(ignore_suggestions)?;
        graph.resolve()
    }

    // ------------------------------------------------------------------
    // Install / upgrade / remove

    /// Install a single package at a version (empty picks the latest
    /// tag, else the default branch). Dependency planning is the
    /// caller's concern; this installs exactly one package.
    pub fn install(&mut self, pkg_path: &str, version: &str) -> Result<InstalledPackage> {
        let candidate = match self.find_installed_package(pkg_path) {
            Some(ipkg) if ipkg.is_builtin() => {
                return Err(Error::Lifecycle(format!(
                    "\"{}\" is built into the runtime",
                    ipkg.package.name
                )));
            }
            // Same identity: a re-install at the given version.
            Some(ipkg) => ipkg.package,
            None => {
                let package = self.resolve_candidate(pkg_path)?;

                // A different package already owning the short name is a
                // conflict, not an overwrite.
                if let Some(existing) = self.installed.get(&package.name) {
                    if existing.package.git_url != package.git_url {
                        return Err(Error::NameCollision(format!(
                            "a package named \"{}\" ({}) is already installed",
                            package.name, existing.package.git_url
                        )));
                    }
                }

                package
            }
        };

        self.install_package(candidate, version, None)
    }

    /// Install a package from a local clone (an extracted bundle entry)
    /// while keeping its original URL as the package identity.
    pub fn install_from_clone(
        &mut self,
        git_url: &str,
        local_clone: &Path,
        version: &str,
    ) -> Result<InstalledPackage> {
        let package = Package::from_url(git_url);
        self.install_package(package, version, Some(local_clone))
    }

    fn install_package(
        &mut self,
        package: Package,
        version: &str,
        clone_from: Option<&Path>,
    ) -> Result<InstalledPackage> {
        info!(package = %package.qualified_name(), version, "installing");

        let clone_path = self.package_clone_dir.join(&package.name);

        if clone_path.exists() {
            std::fs::remove_dir_all(&clone_path)?;
        }

        // Resolving an abbreviated commit hash needs full history.
        let shallow = !looks_like_commit_hash(version);
        let clone_url = clone_from
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| package.git_url.clone());
        let repo = git::clone(&clone_url, &clone_path, shallow)?;

        if clone_from.is_some() {
            git::set_remote_url(&repo, &package.git_url)?;
        }

        let versions = ordered_version_tags(git::tag_names(&repo)?);
        let default_branch = git::default_branch(&repo)?;

        let version = if version.is_empty() {
            versions
                .last()
                .cloned()
                .unwrap_or_else(|| default_branch.clone())
        } else {
            version.to_string()
        };

        let method = classify_version(&repo, &version, &versions, &default_branch);

        git::checkout(&repo, &version).map_err(|_| {
            Error::NotFound(format!(
                "package \"{}\" has no commit, tag, or branch \"{version}\"",
                package.name
            ))
        })?;

        let current_hash = git::head_commit_hash(&repo)?;
        let is_outdated = self.compute_outdated(&repo, method, &version, &versions)?;

        let metadata = self
            .read_metadata(&package, &clone_path)
            .map_err(Error::Metadata)?;

        self.check_name_collisions(&package, &metadata)?;

        let mut package = package;
        package.metadata = metadata.clone();

        self.stage(&package, &metadata, &clone_path)?;

        // Loading and pinning survive a re-install.
        let previous = self.installed.get(&package.name);
        let status = PackageStatus {
            is_loaded: previous.map(|p| p.status.is_loaded).unwrap_or(false),
            is_pinned: previous.map(|p| p.status.is_pinned).unwrap_or(false),
            is_outdated,
            tracking_method: Some(method),
            current_version: version,
            current_hash,
        };

        let ipkg = InstalledPackage { package, status };
        self.installed.insert(ipkg.package.name.clone(), ipkg.clone());
        self.write_manifest()?;
        self.refresh_bin_dir()?;
        Ok(ipkg)
    }

    /// Aliases and names of all installed packages must stay disjoint.
    /// Raised before staging mutates the filesystem.
    fn check_name_collisions(&self, package: &Package, metadata: &Metadata) -> Result<()> {
        let mut new_names = vec![package.name.clone()];
        new_names.extend(metadata.aliases());

        for ipkg in self.installed_packages() {
            if ipkg.package.name == package.name {
                continue;
            }

            let mut taken = vec![ipkg.package.name.clone()];
            taken.extend(ipkg.package.metadata.aliases());

            for name in &new_names {
                if taken.contains(name) {
                    return Err(Error::NameCollision(format!(
                        "name or alias \"{name}\" conflicts with installed package \"{}\"",
                        ipkg.package.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Stage a package's build output, scripts, plugins, and declared
    /// executables from its clone.
    fn stage(&self, package: &Package, metadata: &Metadata, clone_path: &Path) -> Result<()> {
        if !metadata.build_command().is_empty() {
            self.run_build_command(package, metadata, clone_path)?;
        }

        // User edits to declared config files survive a re-stage.
        let saved_configs = self.save_config_files(package, metadata)?;

        // Scripts: the declared script_dir, or the package root.
        let script_src = clone_path.join(metadata.script_dir());

        if !script_src.exists() {
            return Err(Error::Staging(format!(
                "package \"{}\" declares script_dir \"{}\" but it does not exist",
                package.name,
                metadata.script_dir()
            )));
        }

        if metadata.has_script_dir() && !script_src.join(SCRIPT_ENTRY).exists() {
            return Err(Error::Staging(format!(
                "package \"{}\" script_dir has no {SCRIPT_ENTRY}",
                package.name
            )));
        }

        let script_dst = self.script_dir.join(&package.name);
        remove_path(&script_dst)?;
        copy_dir(&script_src, &script_dst)?;

        // Plugins: only staged when the build produced the directory;
        // an explicitly declared plugin_dir must exist.
        let plugin_src = clone_path.join(metadata.plugin_dir());
        let plugin_dst = self.plugin_dir.join(&package.name);
        remove_path(&plugin_dst)?;

        if plugin_src.exists() {
            copy_dir(&plugin_src, &plugin_dst)?;
        } else if !metadata.plugin_dir().is_empty() && metadata.plugin_dir() != "build" {
            return Err(Error::Staging(format!(
                "package \"{}\" declares plugin_dir \"{}\" but it does not exist",
                package.name,
                metadata.plugin_dir()
            )));
        }

        // Alias symlinks beside the staged scripts.
        for alias in metadata.aliases() {
            let link = self.script_dir.join(&alias);
            remove_path(&link)?;
            symlink_dir(Path::new(&package.name), &link)?;
        }

        // Declared executables must exist in the clone.
        for exe in metadata.executables() {
            if !clone_path.join(&exe).exists() {
                return Err(Error::Staging(format!(
                    "package \"{}\" declares executable \"{exe}\" but it does not exist",
                    package.name
                )));
            }
        }

        self.restore_config_files(package, &saved_configs)?;

        Ok(())
    }

    /// Copy the staged copies of a package's declared config files into
    /// scratch before the staged trees are wiped. Returns
    /// `(saved, staged)` path pairs for `restore_config_files`.
    fn save_config_files(
        &self,
        package: &Package,
        metadata: &Metadata,
    ) -> Result<Vec<(PathBuf, PathBuf)>> {
        let save_root = self.scratch_dir.join("config").join(&package.name);
        remove_path(&save_root)?;

        let mut saved = Vec::new();

        for (i, config_file) in metadata.config_files().iter().enumerate() {
            let Some(staged) = self.staged_config_path(package, metadata, config_file) else {
                warn!(
                    package = %package.name,
                    file = %config_file,
                    "config file is outside the staged trees"
                );
                continue;
            };

            if !staged.is_file() {
                continue;
            }

            let save_path = save_root.join(i.to_string());

            if let Some(parent) = save_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            std::fs::copy(&staged, &save_path)?;
            saved.push((save_path, staged));
        }

        Ok(saved)
    }

    fn restore_config_files(&self, package: &Package, saved: &[(PathBuf, PathBuf)]) -> Result<()> {
        for (save_path, staged) in saved {
            if let Some(parent) = staged.parent() {
                std::fs::create_dir_all(parent)?;
            }

            std::fs::copy(save_path, staged)?;
            info!(package = %package.name, file = %staged.display(), "kept existing config file");
        }

        Ok(())
    }

    /// Where a declared config file (a path relative to the package
    /// root) lands in the staged trees. `None` when the path falls
    /// under neither the script nor the plugin directory.
    fn staged_config_path(
        &self,
        package: &Package,
        metadata: &Metadata,
        config_file: &str,
    ) -> Option<PathBuf> {
        let file = Path::new(config_file);

        if let Ok(rel) = file.strip_prefix(metadata.script_dir()) {
            return Some(self.script_dir.join(&package.name).join(rel));
        }

        if let Ok(rel) = file.strip_prefix(metadata.plugin_dir()) {
            return Some(self.plugin_dir.join(&package.name).join(rel));
        }

        None
    }

    fn run_build_command(
        &self,
        package: &Package,
        metadata: &Metadata,
        clone_path: &Path,
    ) -> Result<()> {
        let log_path = self.log_dir.join(format!("{}-build.log", package.name));
        info!(package = %package.name, log = %log_path.display(), "running build command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(metadata.build_command())
            .current_dir(clone_path)
            .output()?;

        let mut log = output.stdout;
        log.extend_from_slice(&output.stderr);
        std::fs::write(&log_path, log)?;

        if !output.status.success() {
            return Err(Error::Staging(format!(
                "build command for \"{}\" failed, see {}",
                package.name,
                log_path.display()
            )));
        }

        Ok(())
    }

    /// Run a package's declared test suite in a scratch clone at
    /// `version` (empty picks the latest tag, else the default branch).
    /// The package is built first when it declares a build command.
    /// Returns the path of the captured test log.
    pub fn test(&mut self, pkg_path: &str, version: &str) -> Result<PathBuf> {
        let package = match self.find_installed_package(pkg_path) {
            Some(ipkg) if ipkg.is_builtin() => {
                return Err(Error::Lifecycle(format!(
                    "\"{}\" is built into the runtime",
                    ipkg.package.name
                )));
            }
            Some(ipkg) => ipkg.package,
            None => self.resolve_candidate(pkg_path)?,
        };

        let clone_path = self.scratch_dir.join("test").join(&package.name);
        remove_path(&clone_path)?;

        let shallow = !looks_like_commit_hash(version);
        let repo = git::clone(&package.git_url, &clone_path, shallow)?;

        let version = if version.is_empty() {
            let versions = ordered_version_tags(git::tag_names(&repo)?);
            let default_branch = git::default_branch(&repo)?;
            versions.last().cloned().unwrap_or(default_branch)
        } else {
            version.to_string()
        };

        git::checkout(&repo, &version).map_err(|_| {
            Error::NotFound(format!(
                "package \"{}\" has no commit, tag, or branch \"{version}\"",
                package.name
            ))
        })?;

        let metadata = self
            .read_metadata(&package, &clone_path)
            .map_err(Error::Metadata)?;

        if metadata.test_command().is_empty() {
            return Err(Error::Lifecycle(format!(
                "package \"{}\" does not declare a test_command",
                package.name
            )));
        }

        if !metadata.build_command().is_empty() {
            self.run_build_command(&package, &metadata, &clone_path)?;
        }

        self.run_test_command(&package, &metadata, &clone_path)
    }

    fn run_test_command(
        &self,
        package: &Package,
        metadata: &Metadata,
        clone_path: &Path,
    ) -> Result<PathBuf> {
        let log_path = self.log_dir.join(format!("{}-test.log", package.name));
        info!(package = %package.name, log = %log_path.display(), "running test command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(metadata.test_command())
            .current_dir(clone_path)
            .output()?;

        let mut log = output.stdout;
        log.extend_from_slice(&output.stderr);
        std::fs::write(&log_path, log)?;

        if !output.status.success() {
            return Err(Error::Lifecycle(format!(
                "test command for \"{}\" failed, see {}",
                package.name,
                log_path.display()
            )));
        }

        Ok(log_path)
    }

    fn compute_outdated(
        &self,
        repo: &git2::Repository,
        method: TrackingMethod,
        version: &str,
        versions: &[String],
    ) -> Result<bool> {
        match method {
            TrackingMethod::Version => {
                let newest = versions.last().map(String::as_str).unwrap_or(version);
                Ok(normalize_tag(version) != normalize_tag(newest))
            }
            TrackingMethod::Branch => Ok(git::commits_behind_remote(repo)? > 0),
            // A fixed commit is never outdated.
            TrackingMethod::Commit => Ok(false),
        }
    }

    /// Upgrade an installed package to its newest eligible version.
    pub fn upgrade(&mut self, pkg_path: &str) -> Result<InstalledPackage> {
        let ipkg = self
            .find_installed_package(pkg_path)
            .ok_or_else(|| Error::NotFound(format!("package \"{pkg_path}\" is not installed")))?;

        if ipkg.is_builtin() {
            return Err(Error::Lifecycle(format!(
                "\"{}\" is built into the runtime",
                ipkg.package.name
            )));
        }

        if ipkg.status.is_pinned {
            return Err(Error::Lifecycle(format!(
                "\"{}\" is pinned",
                ipkg.package.name
            )));
        }

        if !ipkg.status.is_outdated {
            return Err(Error::Lifecycle(format!(
                "\"{}\" is already up to date",
                ipkg.package.name
            )));
        }

        match ipkg.status.tracking_method {
            Some(TrackingMethod::Version) => {
                // Move to the newest available tag.
                self.install_package(ipkg.package, "", None)
            }
            Some(TrackingMethod::Branch) => {
                let branch = ipkg.status.current_version.clone();
                self.install_package(ipkg.package, &branch, None)
            }
            Some(TrackingMethod::Commit) | None => Err(Error::Lifecycle(format!(
                "\"{}\" tracks a fixed commit and cannot be upgraded",
                ipkg.package.name
            ))),
        }
    }

    /// Remove an installed package: unload, delete its clone, staged
    /// content, alias links, and executable links, then drop it from
    /// the manifest.
    pub fn remove(&mut self, pkg_path: &str) -> Result<()> {
        let ipkg = self
            .find_installed_package(pkg_path)
            .ok_or_else(|| Error::NotFound(format!("package \"{pkg_path}\" is not installed")))?;

        if ipkg.is_builtin() {
            return Err(Error::Lifecycle(format!(
                "\"{}\" is built into the runtime and cannot be removed",
                ipkg.package.name
            )));
        }

        info!(package = %ipkg.package.qualified_name(), "removing");

        if ipkg.status.is_loaded {
            self.unload(&ipkg.package.name)?;
        }

        let name = ipkg.package.name.clone();
        remove_path(&self.package_clone_dir.join(&name))?;
        remove_path(&self.script_dir.join(&name))?;
        remove_path(&self.plugin_dir.join(&name))?;

        for alias in ipkg.package.metadata.aliases() {
            remove_path(&self.script_dir.join(&alias))?;
        }

        self.installed.remove(&name);
        self.write_manifest()?;
        self.refresh_bin_dir()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pin / unpin

    pub fn pin(&mut self, pkg_path: &str) -> Result<InstalledPackage> {
        self.set_pinned(pkg_path, true)
    }

    pub fn unpin(&mut self, pkg_path: &str) -> Result<InstalledPackage> {
        self.set_pinned(pkg_path, false)
    }

    fn set_pinned(&mut self, pkg_path: &str, pinned: bool) -> Result<InstalledPackage> {
        let found = self
            .find_installed_package(pkg_path)
            .ok_or_else(|| Error::NotFound(format!("package \"{pkg_path}\" is not installed")))?;

        if found.is_builtin() {
            return Err(Error::Lifecycle(format!(
                "\"{}\" is built into the runtime",
                found.package.name
            )));
        }

        let entry = self
            .installed
            .get_mut(&found.package.name)
            .ok_or_else(|| Error::NotFound(format!("package \"{pkg_path}\" is not installed")))?;

        if entry.status.is_pinned != pinned {
            entry.status.is_pinned = pinned;
            let result = entry.clone();
            self.write_manifest()?;
            return Ok(result);
        }

        Ok(entry.clone())
    }

    // ------------------------------------------------------------------
    // Load / unload

    /// Mark a package loaded and regenerate the autoloader. Loading a
    /// package with neither a script entry point nor a plugin is
    /// refused.
    pub fn load(&mut self, pkg_path: &str) -> Result<()> {
        let found = self
            .find_installed_package(pkg_path)
            .ok_or_else(|| Error::NotFound(format!("package \"{pkg_path}\" is not installed")))?;

        if found.is_builtin() {
            // Built-ins are always loaded.
            return Ok(());
        }

        let name = found.package.name.clone();
        let has_scripts = self.script_dir.join(&name).join(SCRIPT_ENTRY).exists();
        let has_plugin = self.plugin_dir.join(&name).exists();

        if !has_scripts && !has_plugin {
            return Err(Error::Lifecycle(format!(
                "package \"{name}\" has no {SCRIPT_ENTRY} and no plugin, nothing to load"
            )));
        }

        self.set_plugin_enabled(&name, true)?;

        if let Some(entry) = self.installed.get_mut(&name) {
            entry.status.is_loaded = true;
        }

        self.write_autoloader()?;
        self.write_manifest()
    }

    /// Mark a package unloaded. Refused while other loaded packages
    /// depend on it; `unload_with_unused_dependers` handles cascades.
    pub fn unload(&mut self, pkg_path: &str) -> Result<()> {
        let found = self
            .find_installed_package(pkg_path)
            .ok_or_else(|| Error::NotFound(format!("package \"{pkg_path}\" is not installed")))?;

        if found.is_builtin() {
            return Err(Error::Lifecycle(format!(
                "\"{}\" is built into the runtime and cannot be unloaded",
                found.package.name
            )));
        }

        let name = found.package.name.clone();
        self.set_plugin_enabled(&name, false)?;

        if let Some(entry) = self.installed.get_mut(&name) {
            entry.status.is_loaded = false;
        }

        self.write_autoloader()?;
        self.write_manifest()
    }

    /// Load a package and, first, every installed dependency of it that
    /// is not yet loaded. Returns the names loaded, dependencies first.
    pub fn load_with_dependencies(&mut self, pkg_path: &str) -> Result<Vec<String>> {
        let found = self
            .find_installed_package(pkg_path)
            .ok_or_else(|| Error::NotFound(format!("package \"{pkg_path}\" is not installed")))?;

        // Explicit worklist with a visited set; the installed graph may
        // contain cycles.
        let mut order: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut worklist: VecDeque<String> = VecDeque::new();
        worklist.push_back(found.package.name.clone());

        while let Some(name) = worklist.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }

            order.push(name.clone());

            let Some(ipkg) = self.find_installed_package(&name) else {
                continue;
            };

            for dep in self.installed_package_dependencies(&ipkg) {
                worklist.push_back(dep);
            }
        }

        // Dependencies first.
        order.reverse();

        let mut loaded = Vec::new();

        for name in order {
            let Some(ipkg) = self.find_installed_package(&name) else {
                continue;
            };

            if ipkg.is_builtin() || ipkg.status.is_loaded {
                continue;
            }

            self.load(&name)?;
            loaded.push(name);
        }

        Ok(loaded)
    }

    /// Unload a package and any of its dependencies left unused. Refused
    /// when a still-loaded package outside the unload set depends on the
    /// target; a loaded dependency cycle through the target is unloaded
    /// as a unit.
    pub fn unload_with_unused_dependers(&mut self, pkg_path: &str) -> Result<Vec<String>> {
        let found = self
            .find_installed_package(pkg_path)
            .ok_or_else(|| Error::NotFound(format!("package \"{pkg_path}\" is not installed")))?;
        let target = found.package.name.clone();

        // Loaded packages that transitively depend on the target.
        let dependers = self.transitive_loaded_dependers(&target);

        // Members of a cycle through the target also transitively depend
        // on it and are reachable from it; they unload together.
        let reachable = self.transitive_loaded_dependencies(&target);
        let cycle: HashSet<String> = dependers.intersection(&reachable).cloned().collect();
        let blockers: Vec<String> = dependers.difference(&cycle).cloned().collect();

        if !blockers.is_empty() {
            let mut blockers = blockers;
            blockers.sort();
            return Err(Error::Lifecycle(format!(
                "cannot unload \"{target}\", still loaded packages depend on it: {}",
                blockers.join(", ")
            )));
        }

        let mut unload_set: HashSet<String> = cycle;
        unload_set.insert(target.clone());

        // Cascade into dependencies that no loaded package outside the
        // unload set still uses.
        let mut worklist: VecDeque<String> = unload_set.iter().cloned().collect();

        while let Some(name) = worklist.pop_front() {
            let Some(ipkg) = self.find_installed_package(&name) else {
                continue;
            };

            for dep in self.installed_package_dependencies(&ipkg) {
                if unload_set.contains(&dep) {
                    continue;
                }

                let Some(dep_pkg) = self.find_installed_package(&dep) else {
                    continue;
                };

                if dep_pkg.is_builtin() || !dep_pkg.status.is_loaded {
                    continue;
                }

                let still_used = self
                    .list_depender_pkgs(&dep)
                    .into_iter()
                    .filter(|p| p.status.is_loaded)
                    .any(|p| !unload_set.contains(&p.package.name));

                if !still_used {
                    unload_set.insert(dep.clone());
                    worklist.push_back(dep);
                }
            }
        }

        let mut unloaded: Vec<String> = unload_set.into_iter().collect();
        unloaded.sort();

        for name in &unloaded {
            self.unload(name)?;
        }

        Ok(unloaded)
    }

    fn transitive_loaded_dependers(&self, target: &str) -> HashSet<String> {
        let mut found: HashSet<String> = HashSet::new();
        let mut worklist: VecDeque<String> = VecDeque::new();
        worklist.push_back(target.to_string());

        while let Some(name) = worklist.pop_front() {
            for depender in self.list_depender_pkgs(&name) {
                if !depender.status.is_loaded || depender.is_builtin() {
                    continue;
                }

                if found.insert(depender.package.name.clone()) {
                    worklist.push_back(depender.package.name);
                }
            }
        }

        found
    }

    fn transitive_loaded_dependencies(&self, target: &str) -> HashSet<String> {
        let mut found: HashSet<String> = HashSet::new();
        let mut worklist: VecDeque<String> = VecDeque::new();
        worklist.push_back(target.to_string());

        while let Some(name) = worklist.pop_front() {
            let Some(ipkg) = self.find_installed_package(&name) else {
                continue;
            };

            for dep in self.installed_package_dependencies(&ipkg) {
                let Some(dep_pkg) = self.find_installed_package(&dep) else {
                    continue;
                };

                if !dep_pkg.status.is_loaded || dep_pkg.is_builtin() {
                    continue;
                }

                if found.insert(dep) {
                    worklist.push_back(dep_pkg.package.name);
                }
            }
        }

        found
    }

    /// Regenerate the autoloader listing: one `@load` line per loaded
    /// package that has a staged script entry point.
    fn write_autoloader(&self) -> Result<()> {
        let mut lines = String::new();

        for ipkg in self.installed.values() {
            if !ipkg.status.is_loaded {
                continue;
            }

            let name = &ipkg.package.name;

            if self.script_dir.join(name).join(SCRIPT_ENTRY).exists() {
                lines.push_str(&format!("@load ./{name}\n"));
            }
        }

        std::fs::write(self.script_dir.join(AUTOLOADER_FILENAME), lines)?;
        Ok(())
    }

    /// Flip a staged plugin's magic marker between enabled and disabled.
    fn set_plugin_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let plugin_dir = self.plugin_dir.join(name);
        let magic = plugin_dir.join(PLUGIN_MAGIC);
        let disabled = plugin_dir.join(PLUGIN_MAGIC_DISABLED);

        if enabled && disabled.exists() {
            std::fs::rename(&disabled, &magic)?;
        } else if !enabled && magic.exists() {
            std::fs::rename(&magic, &disabled)?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Refresh

    /// Re-fetch every installed package's clone and recompute its
    /// outdated flag.
    pub fn refresh_installed_packages(&mut self) -> Result<()> {
        let names: Vec<String> = self.installed.keys().cloned().collect();

        for name in names {
            let clone_path = self.package_clone_dir.join(&name);

            let repo = match git::open(&clone_path) {
                Ok(repo) => repo,
                Err(err) => {
                    warn!(package = %name, %err, "cannot open clone, skipping refresh");
                    continue;
                }
            };

            if let Err(err) = git::fetch(&repo) {
                warn!(package = %name, %err, "fetch failed, skipping refresh");
                continue;
            }

            let versions = ordered_version_tags(git::tag_names(&repo)?);

            let Some(entry) = self.installed.get(&name) else {
                continue;
            };
            let method = entry.status.tracking_method.unwrap_or(TrackingMethod::Branch);
            let version = entry.status.current_version.clone();
            let is_outdated = self.compute_outdated(&repo, method, &version, &versions)?;

            if let Some(entry) = self.installed.get_mut(&name) {
                entry.status.is_outdated = is_outdated;
            }
        }

        self.write_manifest()
    }

    /// Recreate the bin-dir links for every installed package's declared
    /// executables.
    pub fn refresh_bin_dir(&self) -> Result<()> {
        self.clear_bin_dir()?;

        for ipkg in self.installed.values() {
            let clone_path = self.package_clone_dir.join(&ipkg.package.name);

            for exe in ipkg.package.metadata.executables() {
                let target = clone_path.join(&exe);

                let Some(basename) = target.file_name() else {
                    continue;
                };

                let link = self.bin_dir.join(basename);

                if target.exists() {
                    remove_path(&link)?;
                    symlink_file(&target, &link)?;
                }
            }
        }

        Ok(())
    }

    fn clear_bin_dir(&self) -> Result<()> {
        if !self.bin_dir.exists() {
            return Ok(());
        }

        for entry in std::fs::read_dir(&self.bin_dir)? {
            let path = entry?.path();

            // Only links we created belong here.
            if path.symlink_metadata()?.file_type().is_symlink() {
                std::fs::remove_file(&path)?;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors used by the bundle and command layers

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn package_clone_path(&self, name: &str) -> PathBuf {
        self.package_clone_dir.join(name)
    }

    pub fn staged_script_path(&self, name: &str) -> PathBuf {
        self.script_dir.join(name)
    }

    pub fn staged_plugin_path(&self, name: &str) -> PathBuf {
        self.plugin_dir.join(name)
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }
}

/// Classification used throughout: commit if the text resolves to a
/// commit hash, else version if it is a known tag, else branch.
fn classify_version(
    repo: &git2::Repository,
    version: &str,
    tags: &[String],
    _default_branch: &str,
) -> TrackingMethod {
    if git::is_commit_hash(repo, version) {
        TrackingMethod::Commit
    } else if tags.iter().any(|t| t == version) {
        TrackingMethod::Version
    } else {
        TrackingMethod::Branch
    }
}

fn looks_like_commit_hash(text: &str) -> bool {
    text.len() >= 7 && text.chars().all(|c| c.is_ascii_hexdigit())
}

fn remove_path(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path)?,
        Ok(_) => std::fs::remove_file(path)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    Ok(())
}

/// Recursive copy, skipping `.git`.
fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.map_err(|err| {
            Error::Staging(format!("cannot walk {}: {err}", src.display()))
        })?;

        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| Error::Staging(format!("bad path under {}", src.display())))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }

            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

fn move_dir_contents(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());

        if std::fs::rename(entry.path(), &target).is_err() {
            // Cross-device move.
            if entry.path().is_dir() {
                copy_dir(&entry.path(), &target)?;
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::copy(entry.path(), &target)?;
                std::fs::remove_file(entry.path())?;
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}
