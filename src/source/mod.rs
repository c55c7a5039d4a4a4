// src/source/mod.rs

//! Package sources: git repositories of index files listing package
//! URLs.
//!
//! A source clone is kept under the manager's source clone directory and
//! reused across runs; a changed remote URL for the same source name
//! forces a re-clone. Index files (`grove.index`, legacy `pkg.index`)
//! may live anywhere in the source tree, and their directory becomes the
//! listed packages' disambiguating `directory`. A source may also ship
//! an `aggregate.meta` cache carrying per-package metadata keyed by
//! `dir/name`.

use crate::error::{Error, Result};
use crate::git;
use crate::metadata::parse_ini;
use crate::package::{Metadata, Package};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Preferred index file name.
pub const INDEX_FILENAME: &str = "grove.index";

/// Older index file name, still accepted.
pub const LEGACY_INDEX_FILENAME: &str = "pkg.index";

/// Name of a source's optional metadata cache file.
pub const AGGREGATE_FILENAME: &str = "aggregate.meta";

/// A named registry of packages backed by a git repository of index
/// files.
pub struct Source {
    pub name: String,
    pub git_url: String,
    pub clone_path: PathBuf,
}

impl Source {
    /// Open or create the clone for a source. An existing clone whose
    /// origin matches `git_url` is reused; a mismatch discards it and
    /// clones fresh. A `url@version` suffix checks out that version
    /// after cloning.
    pub fn new(name: &str, git_url: &str, clone_path: &Path) -> Result<Self> {
        let (url, version) = match git_url.rsplit_once('@') {
            // A '@' inside the scheme or userinfo part is not a version
            // suffix; only split when the tail looks like a revision.
            Some((head, tail)) if !tail.contains('/') && !head.is_empty() => (head, Some(tail)),
            _ => (git_url, None),
        };

        let source = Self {
            name: name.to_string(),
            git_url: url.to_string(),
            clone_path: clone_path.to_path_buf(),
        };

        let repo = source.open_or_clone()?;

        if let Some(version) = version {
            git::checkout(&repo, version)?;
        }

        Ok(source)
    }

    fn open_or_clone(&self) -> Result<git2::Repository> {
        if self.clone_path.join(".git").exists() {
            let repo = git::open(&self.clone_path)?;
            let recorded = git::remote_url(&repo)?;

            if recorded == self.git_url {
                return Ok(repo);
            }

            info!(
                source = %self.name,
                old = %recorded,
                new = %self.git_url,
                "source URL changed, re-cloning"
            );
            drop(repo);
            std::fs::remove_dir_all(&self.clone_path)?;
        }

        if let Some(parent) = self.clone_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        git::clone(&self.git_url, &self.clone_path, true)
    }

    /// Fetch and fast-forward the source listing.
    pub fn refresh(&self) -> Result<()> {
        debug!(source = %self.name, "refreshing source");
        let repo = git::open(&self.clone_path)?;
        git::pull(&repo)
    }

    /// Every index file in the source tree, `.git` excluded.
    pub fn package_index_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.clone_path)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");

        for entry in walker.flatten() {
            let name = entry.file_name().to_string_lossy();

            if name == INDEX_FILENAME || name == LEGACY_INDEX_FILENAME {
                files.push(entry.path().to_path_buf());
            }
        }

        files.sort();
        files
    }

    /// All packages listed by this source's index files, with cached
    /// metadata attached where the aggregate has it.
    pub fn packages(&self) -> Result<Vec<Package>> {
        let aggregate = self.read_aggregate();
        let mut packages = Vec::new();

        for index_file in self.package_index_files() {
            let directory = self.index_directory(&index_file);
            let text = std::fs::read_to_string(&index_file)?;

            for line in text.lines() {
                let url = line.trim();

                if url.is_empty() || url.starts_with('#') {
                    continue;
                }

                let mut package =
                    Package::from_source(url, &self.name, &directory, Metadata::default());

                if let Some(fields) = aggregate.get(&package.module_path()) {
                    package.metadata = Metadata::new(fields.clone());
                }

                packages.push(package);
            }
        }

        Ok(packages)
    }

    /// The index file's directory relative to the clone root, used as
    /// the packages' disambiguating directory component.
    fn index_directory(&self, index_file: &Path) -> String {
        index_file
            .parent()
            .and_then(|dir| dir.strip_prefix(&self.clone_path).ok())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default()
    }

    fn read_aggregate(
        &self,
    ) -> std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>> {
        let path = self.clone_path.join(AGGREGATE_FILENAME);

        match std::fs::read_to_string(&path) {
            Ok(text) => parse_ini(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Default::default(),
            Err(err) => {
                warn!(source = %self.name, %err, "unreadable aggregate metadata");
                Default::default()
            }
        }
    }
}

/// A source name must be usable as a directory name.
pub fn validate_source_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::Config(format!("invalid source name \"{name}\"")));
    }

    Ok(())
}
