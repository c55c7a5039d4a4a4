// src/version/mod.rs

//! Version tag handling and constraint satisfaction for package
//! dependencies.
//!
//! Packages are tracked against a git repository in one of three ways: a
//! semantic-version tag, a moving branch, or a fixed commit. This module
//! normalizes and orders version tags, classifies version specs from
//! package metadata, and checks whether a tracked version fulfills a
//! depender's requirement.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an installed package's version is pinned to its git repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMethod {
    /// Pinned to a semantic-version tag.
    Version,
    /// Following a moving branch.
    Branch,
    /// Fixed to a commit hash.
    Commit,
}

impl fmt::Display for TrackingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMethod::Version => write!(f, "version"),
            TrackingMethod::Branch => write!(f, "branch"),
            TrackingMethod::Commit => write!(f, "commit"),
        }
    }
}

/// Strip a single leading `v` followed by a digit: "v1.2.3" -> "1.2.3".
/// All other strings pass through unchanged.
pub fn normalize_tag(tag: &str) -> &str {
    let mut chars = tag.chars();

    if let (Some('v'), Some(second)) = (chars.next(), chars.next()) {
        if second.is_ascii_digit() {
            return &tag[1..];
        }
    }

    tag
}

/// Lenient semver parse: pads missing minor/patch components so that
/// tags like "1.2" or "3" still order correctly.
pub fn coerce_semver(text: &str) -> Option<Version> {
    if let Ok(v) = Version::parse(text) {
        return Some(v);
    }

    // Split off any pre-release/build suffix before padding.
    let end = text
        .find(['-', '+'])
        .unwrap_or(text.len());
    let (core, suffix) = text.split_at(end);

    let parts: Vec<&str> = core.split('.').collect();

    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    for part in &parts {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }

    let mut padded = parts.join(".");

    for _ in parts.len()..3 {
        padded.push_str(".0");
    }

    padded.push_str(suffix);
    Version::parse(&padded).ok()
}

/// Filter `tags` to those that coerce to a valid semantic version after
/// normalization and return them sorted ascending by semver order, in
/// their original (un-normalized) string form. Non-semver tags are
/// dropped from version-tracking consideration; they remain usable as
/// explicit branch/commit references.
pub fn ordered_version_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed: Vec<(Version, String)> = tags
        .into_iter()
        .filter_map(|tag| {
            let tag = tag.as_ref();
            coerce_semver(normalize_tag(tag)).map(|v| (v, tag.to_string()))
        })
        .collect();

    parsed.sort_by(|a, b| a.0.cmp(&b.0));
    parsed.into_iter().map(|(_, tag)| tag).collect()
}

/// A depender's requirement on a dependency, parsed once from the
/// metadata mini-language at edge-construction time.
///
/// The textual forms are `*` (or an empty string), `branch=<name>`, and a
/// semver requirement string such as `>=1.0.0,<2.0.0`.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionSpec {
    /// Any version is acceptable.
    Any,
    /// The dependency must track the named branch.
    Branch(String),
    /// The dependency's version must satisfy a semver requirement.
    Exact(VersionReq),
}

impl VersionSpec {
    /// Parse a version spec string from package metadata.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();

        if text.is_empty() || text == "*" {
            return Ok(VersionSpec::Any);
        }

        if let Some(branch) = text.strip_prefix("branch=") {
            if branch.is_empty() {
                return Err("empty branch name in version spec".to_string());
            }

            return Ok(VersionSpec::Branch(branch.to_string()));
        }

        match VersionReq::parse(text) {
            Ok(req) => Ok(VersionSpec::Exact(req)),
            Err(err) => Err(format!("invalid semver spec \"{text}\": {err}")),
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Any => write!(f, "*"),
            VersionSpec::Branch(name) => write!(f, "branch={name}"),
            VersionSpec::Exact(req) => write!(f, "{req}"),
        }
    }
}

/// A resolved version reference: a tracking method plus the concrete
/// tag, branch name, or commit hash being tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersion {
    pub method: TrackingMethod,
    pub version: String,
}

impl PackageVersion {
    pub fn new(method: TrackingMethod, version: impl Into<String>) -> Self {
        Self {
            method,
            version: version.into(),
        }
    }

    /// Check whether this version fulfills a depender's requirement.
    ///
    /// Branch-tracked versions tolerate only a wildcard or an identical
    /// branch demand; commit-tracked versions only a wildcard;
    /// version-tracked versions are checked against the semver
    /// requirement. On failure the returned string explains the mismatch.
    pub fn fulfills(&self, spec: &VersionSpec) -> std::result::Result<(), String> {
        match (self.method, spec) {
            (_, VersionSpec::Any) => Ok(()),
            (TrackingMethod::Branch, VersionSpec::Branch(required)) => {
                if &self.version == required {
                    Ok(())
                } else {
                    Err(format!(
                        "tracks branch \"{}\", but branch \"{}\" is required",
                        self.version, required
                    ))
                }
            }
            (TrackingMethod::Branch, VersionSpec::Exact(req)) => Err(format!(
                "tracks branch \"{}\", but version {} is required",
                self.version, req
            )),
            (TrackingMethod::Commit, _) => Err(format!(
                "tracks commit \"{}\", which only satisfies a wildcard requirement",
                self.version
            )),
            (TrackingMethod::Version, VersionSpec::Branch(required)) => Err(format!(
                "tracks version \"{}\", but branch \"{}\" is required",
                self.version, required
            )),
            (TrackingMethod::Version, VersionSpec::Exact(req)) => {
                let normalized = normalize_tag(&self.version);

                match coerce_semver(normalized) {
                    Some(semver) if req.matches(&semver) => Ok(()),
                    Some(_) => Err(format!(
                        "version \"{}\" does not satisfy {}",
                        self.version, req
                    )),
                    None => Err(format!(
                        "version \"{}\" is not a valid semantic version",
                        self.version
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag_strips_v_prefix() {
        assert_eq!(normalize_tag("v1.2.3"), "1.2.3");
        assert_eq!(normalize_tag("v0.1"), "0.1");
    }

    #[test]
    fn test_normalize_tag_passthrough() {
        assert_eq!(normalize_tag("release-7"), "release-7");
        assert_eq!(normalize_tag("velvet"), "velvet");
        assert_eq!(normalize_tag("1.2.3"), "1.2.3");
        assert_eq!(normalize_tag("v"), "v");
    }

    #[test]
    fn test_coerce_semver_pads_components() {
        assert_eq!(coerce_semver("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(coerce_semver("3").unwrap(), Version::new(3, 0, 0));
        assert_eq!(coerce_semver("1.2.3").unwrap(), Version::new(1, 2, 3));
    }

    #[test]
    fn test_coerce_semver_keeps_prerelease() {
        let v = coerce_semver("1.2.3-rc1").unwrap();
        assert_eq!(v.pre.as_str(), "rc1");
    }

    #[test]
    fn test_coerce_semver_rejects_garbage() {
        assert!(coerce_semver("notsemver").is_none());
        assert!(coerce_semver("1.2.3.4").is_none());
        assert!(coerce_semver("").is_none());
    }

    #[test]
    fn test_ordered_version_tags() {
        let tags = ordered_version_tags(["v1.0.0", "v0.9.0", "notsemver"]);
        assert_eq!(tags, vec!["v0.9.0", "v1.0.0"]);
    }

    #[test]
    fn test_ordered_version_tags_mixed_forms() {
        let tags = ordered_version_tags(["2.0", "v1.10.0", "v1.9.1", "beta"]);
        assert_eq!(tags, vec!["v1.9.1", "v1.10.0", "2.0"]);
    }

    #[test]
    fn test_version_spec_parse_wildcard() {
        assert_eq!(VersionSpec::parse("*").unwrap(), VersionSpec::Any);
        assert_eq!(VersionSpec::parse("").unwrap(), VersionSpec::Any);
    }

    #[test]
    fn test_version_spec_parse_branch() {
        assert_eq!(
            VersionSpec::parse("branch=main").unwrap(),
            VersionSpec::Branch("main".to_string())
        );
        assert!(VersionSpec::parse("branch=").is_err());
    }

    #[test]
    fn test_version_spec_parse_range() {
        let spec = VersionSpec::parse(">=1.0.0, <2.0.0").unwrap();
        let v = PackageVersion::new(TrackingMethod::Version, "1.5.0");
        assert!(v.fulfills(&spec).is_ok());

        let v = PackageVersion::new(TrackingMethod::Version, "2.0.0");
        assert!(v.fulfills(&spec).is_err());
    }

    #[test]
    fn test_fulfills_branch_tracking() {
        let v = PackageVersion::new(TrackingMethod::Branch, "main");
        assert!(v.fulfills(&VersionSpec::Any).is_ok());
        assert!(v
            .fulfills(&VersionSpec::Branch("main".to_string()))
            .is_ok());
        assert!(v
            .fulfills(&VersionSpec::Branch("dev".to_string()))
            .is_err());
        assert!(v
            .fulfills(&VersionSpec::parse(">=1.0.0").unwrap())
            .is_err());
    }

    #[test]
    fn test_fulfills_commit_tracking() {
        let v = PackageVersion::new(TrackingMethod::Commit, "abc123");
        assert!(v.fulfills(&VersionSpec::Any).is_ok());
        assert!(v
            .fulfills(&VersionSpec::parse(">=0.1.0").unwrap())
            .is_err());
    }

    #[test]
    fn test_fulfills_normalizes_tag() {
        let v = PackageVersion::new(TrackingMethod::Version, "v2.1.0");
        assert!(v.fulfills(&VersionSpec::parse(">=2.0.0").unwrap()).is_ok());
    }
}
