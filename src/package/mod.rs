// src/package/mod.rs

//! Package identity, metadata, and installation state.
//!
//! A `Package` is an installable unit identified by a git URL; it may or
//! may not belong to a `Source`. Installed packages carry a
//! `PackageStatus` recording how their version is tracked and whether
//! they are loaded, pinned, or outdated. `PackageInfo` is a read-only
//! snapshot used during resolution and inspection.

use crate::version::{ordered_version_tags, TrackingMethod, VersionSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved name of the virtual node representing the host runtime.
pub const RUNTIME_PKG_NAME: &str = "runtime";

/// Reserved name of the virtual node representing grove itself.
pub const GROVE_PKG_NAME: &str = "grove";

/// Source name under which built-in runtime packages are registered.
pub const BUILTIN_SOURCE: &str = "builtin";

/// Return whether `name` is one of the reserved virtual package names.
pub fn is_reserved_pkg_name(name: &str) -> bool {
    name == RUNTIME_PKG_NAME || name == GROVE_PKG_NAME
}

/// Last path component of a package path or URL.
pub fn name_from_path(path: &str) -> String {
    canonical_url(path)
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Canonicalize a user-supplied package path or URL: expand a leading
/// tilde and strip trailing slashes.
pub fn canonical_url(path: &str) -> String {
    let expanded = shellexpand::tilde(path);
    expanded.trim_end_matches('/').to_string()
}

/// A package name must be usable as a directory name and must not shadow
/// the reserved virtual packages.
pub fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !is_reserved_pkg_name(name)
}

/// Declarative facts about a package from its metadata file, as a fixed
/// string-to-string mapping with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub BTreeMap<String, String>);

impl Metadata {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self(fields)
    }

    fn field(&self, key: &str) -> &str {
        self.0.get(key).map(String::as_str).unwrap_or("")
    }

    /// Parse a dependency-style field (`depends`/`suggests`) into a
    /// name-to-spec map. Entries are whitespace-separated
    /// `<name> <version-spec>` pairs; an odd token count is malformed.
    fn dependency_field(
        &self,
        key: &str,
    ) -> std::result::Result<BTreeMap<String, String>, String> {
        let tokens: Vec<&str> = self.field(key).split_whitespace().collect();

        if tokens.len() % 2 != 0 {
            return Err(format!("malformed \"{key}\" field"));
        }

        let mut deps = BTreeMap::new();

        for pair in tokens.chunks(2) {
            deps.insert(pair[0].to_string(), pair[1].to_string());
        }

        Ok(deps)
    }

    /// Hard dependencies: package name/path -> version spec string.
    pub fn depends(&self) -> std::result::Result<BTreeMap<String, String>, String> {
        self.dependency_field("depends")
    }

    /// Soft dependencies, only materialized when some other package
    /// *depends* on them.
    pub fn suggests(&self) -> std::result::Result<BTreeMap<String, String>, String> {
        self.dependency_field("suggests")
    }

    /// Relative directory of scripts within the package; empty means the
    /// package root.
    pub fn script_dir(&self) -> &str {
        self.field("script_dir")
    }

    pub fn has_script_dir(&self) -> bool {
        self.0.contains_key("script_dir")
    }

    /// Relative directory of built plugin output; defaults to "build".
    pub fn plugin_dir(&self) -> &str {
        let dir = self.field("plugin_dir");

        if dir.is_empty() {
            "build"
        } else {
            dir
        }
    }

    pub fn build_command(&self) -> &str {
        self.field("build_command")
    }

    pub fn test_command(&self) -> &str {
        self.field("test_command")
    }

    pub fn description(&self) -> &str {
        self.field("description")
    }

    pub fn config_files(&self) -> Vec<String> {
        self.field("config_files")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn executables(&self) -> Vec<String> {
        self.field("executables")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.field("aliases")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    pub fn tags(&self) -> Vec<String> {
        self.field("tags")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Declared user variables: `NAME [default] "description"` entries.
    /// Returns an error when the field does not follow the format.
    pub fn user_vars(&self) -> std::result::Result<Vec<UserVar>, String> {
        UserVar::parse_field(self.field("user_vars"))
    }
}

/// A named value required by a package's build, resolvable from the
/// environment, the configuration, or a declared default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVar {
    pub name: String,
    pub default: String,
    pub description: String,
}

impl UserVar {
    /// Parse the `user_vars` metadata field. Entries have the form
    /// `NAME [default] "description"`, e.g.
    /// `LIBKAFKA_ROOT [/usr] "Path to the librdkafka installation"`.
    /// Text that does not follow the format is a malformed field.
    pub fn parse_field(text: &str) -> std::result::Result<Vec<Self>, String> {
        let re = regex::Regex::new(r#"^(\w+)\s+\[([^\]]*)\]\s+"([^"]*)""#)
            .expect("user_vars pattern is valid");

        let mut rest = text.trim();
        let mut vars = Vec::new();

        while !rest.is_empty() {
            let caps = re
                .captures(rest)
                .ok_or_else(|| "malformed \"user_vars\" field".to_string())?;

            vars.push(UserVar {
                name: caps[1].to_string(),
                default: caps[2].to_string(),
                description: caps[3].to_string(),
            });

            let end = caps.get(0).map_or(rest.len(), |m| m.end());
            rest = rest[end..].trim_start();
        }

        Ok(vars)
    }
}

/// Identity and declared facts about a package, independent of
/// installation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Canonical remote identifier; also doubles as a local path in
    /// test/bundle scenarios.
    pub git_url: String,
    /// Always the last path component of `git_url`.
    pub name: String,
    /// Name of the originating source; empty if referenced directly by
    /// URL.
    #[serde(default)]
    pub source: String,
    /// Sub-path within a source's listing tree, used to disambiguate
    /// same-named packages from different authors.
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Package {
    pub fn from_url(git_url: &str) -> Self {
        let git_url = canonical_url(git_url);

        Self {
            name: name_from_path(&git_url),
            git_url,
            source: String::new(),
            directory: String::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn from_source(
        git_url: &str,
        source: &str,
        directory: &str,
        metadata: Metadata,
    ) -> Self {
        let git_url = canonical_url(git_url);

        Self {
            name: name_from_path(&git_url),
            git_url,
            source: source.to_string(),
            directory: directory.to_string(),
            metadata,
        }
    }

    /// The package's path within its source listing tree, e.g.
    /// "alice/foo" for package "foo" under directory "alice". Just the
    /// name when the package has no source.
    pub fn module_path(&self) -> String {
        if self.directory.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.directory, self.name)
        }
    }

    /// Shortest name that distinguishes the package:
    /// "source/dir/name" for source packages, the git URL otherwise.
    pub fn qualified_name(&self) -> String {
        if self.source.is_empty() {
            self.git_url.clone()
        } else {
            format!("{}/{}", self.source, self.module_path())
        }
    }

    /// Whether a user-supplied path refers to this package. For a
    /// package qualified as "zeal/alice/foo", the inputs "foo",
    /// "alice/foo", and "zeal/alice/foo" all match.
    pub fn matches_path(&self, path: &str) -> bool {
        if self.source.is_empty() {
            let parts: Vec<&str> = path.split('/').collect();

            if parts.len() == 1 {
                return parts[0] == self.name;
            }

            path == self.git_url
        } else {
            let qualified = self.qualified_name();
            let pkg_parts: Vec<&str> = qualified.split('/').collect();
            let path_parts: Vec<&str> = path.split('/').collect();

            if path_parts.len() > pkg_parts.len() {
                return false;
            }

            pkg_parts
                .iter()
                .rev()
                .zip(path_parts.iter().rev())
                .all(|(a, b)| a == b)
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

/// Mutable installation state for an installed package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageStatus {
    #[serde(default)]
    pub is_loaded: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_outdated: bool,
    #[serde(default)]
    pub tracking_method: Option<TrackingMethod>,
    #[serde(default)]
    pub current_version: String,
    #[serde(default)]
    pub current_hash: String,
}

/// A package together with its installation status; the unit stored in
/// the manifest, keyed by package name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub package: Package,
    pub status: PackageStatus,
}

impl InstalledPackage {
    /// Built-in packages ship with the runtime; they satisfy dependency
    /// edges but are never staged, upgraded, or removed.
    pub fn is_builtin(&self) -> bool {
        self.package.source == BUILTIN_SOURCE
    }
}

/// A read-only snapshot of a package used during resolution and
/// inspection: identity plus optional status, metadata, available
/// version tags, and the default branch of its repository.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub package: Package,
    pub status: Option<PackageStatus>,
    pub metadata: Metadata,
    /// Available version tags, semver-ascending.
    pub versions: Vec<String>,
    pub default_branch: String,
    /// The version the metadata snapshot was taken at.
    pub metadata_version: String,
    /// Classification of `metadata_version`.
    pub version_type: TrackingMethod,
    /// Non-empty means everything else is suppressed and resolution must
    /// abort for this package.
    pub invalid_reason: Option<String>,
}

impl PackageInfo {
    pub fn invalid(package: Package, reason: impl Into<String>) -> Self {
        Self {
            package,
            status: None,
            metadata: Metadata::default(),
            versions: Vec::new(),
            default_branch: String::new(),
            metadata_version: String::new(),
            version_type: TrackingMethod::Branch,
            invalid_reason: Some(reason.into()),
        }
    }

    /// Synthesize info for a built-in runtime package, without a clone.
    pub fn builtin(name: &str, version: &str, commit: &str) -> Self {
        let package = Package {
            git_url: format!("{BUILTIN_SOURCE}/{name}"),
            name: name_from_path(name),
            source: BUILTIN_SOURCE.to_string(),
            directory: String::new(),
            metadata: Metadata::default(),
        };

        let status = PackageStatus {
            is_loaded: true,
            is_pinned: true,
            is_outdated: false,
            tracking_method: Some(TrackingMethod::Version),
            current_version: version.to_string(),
            current_hash: commit.to_string(),
        };

        Self {
            package,
            status: Some(status),
            metadata: Metadata::default(),
            versions: vec![version.to_string()],
            default_branch: String::new(),
            metadata_version: version.to_string(),
            version_type: TrackingMethod::Version,
            invalid_reason: None,
        }
    }

    /// Latest semver tag if any exist, else the repository's default
    /// branch.
    pub fn best_version(&self) -> String {
        self.versions
            .last()
            .cloned()
            .unwrap_or_else(|| self.default_branch.clone())
    }

    /// Parse a dependency field of this package's metadata with the
    /// version specs validated. The returned specs are unparsed strings;
    /// the resolver parses them once at edge-construction time.
    pub fn dependencies(
        &self,
        suggestions: bool,
    ) -> std::result::Result<BTreeMap<String, String>, String> {
        if suggestions {
            self.metadata.suggests()
        } else {
            self.metadata.depends()
        }
    }

    /// Sorted available tags recomputed from the raw tag list; useful
    /// when info was synthesized from external data.
    pub fn sorted_versions(&self) -> Vec<String> {
        ordered_version_tags(self.versions.iter().map(String::as_str))
    }
}

/// Validate every version spec in a parsed dependency map, surfacing the
/// first malformed entry.
pub fn validate_dependency_specs(
    deps: &BTreeMap<String, String>,
) -> std::result::Result<(), String> {
    for (name, spec) in deps {
        VersionSpec::parse(spec)
            .map_err(|err| format!("dependency \"{name}\": {err}"))?;
    }

    Ok(())
}
