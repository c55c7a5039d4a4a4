// src/manifest/mod.rs

//! The installed-package manifest: the single source of truth for
//! installed state.
//!
//! The manifest is a JSON document rewritten as a whole after every
//! mutation, via a temp file renamed into place. Failure modes are
//! bounded to "old manifest" or "new manifest", never a torn one.
//! Built-in runtime packages are never persisted.

use crate::error::Result;
use crate::package::InstalledPackage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Schema version written by this build.
pub const MANIFEST_VERSION: u32 = 1;

/// The persisted document. `script_dir`, `plugin_dir`, and `bin_dir`
/// record where staged content lived at the time of the last write;
/// a mismatch against the configured paths on startup triggers
/// relocation of the staged content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_version: u32,
    #[serde(default)]
    pub script_dir: String,
    #[serde(default)]
    pub plugin_dir: String,
    #[serde(default)]
    pub bin_dir: String,
    #[serde(default)]
    pub installed_packages: Vec<InstalledPackage>,
}

impl Manifest {
    pub fn new(script_dir: &str, plugin_dir: &str, bin_dir: &str) -> Self {
        Self {
            manifest_version: MANIFEST_VERSION,
            script_dir: script_dir.to_string(),
            plugin_dir: plugin_dir.to_string(),
            bin_dir: bin_dir.to_string(),
            installed_packages: Vec::new(),
        }
    }

    /// Read a manifest, or return `None` when the file does not exist
    /// yet (first run).
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let manifest: Manifest = serde_json::from_str(&text)?;
        Ok(Some(manifest))
    }

    /// Write the whole document through a temp file in the same
    /// directory, then rename over the target.
    pub fn write(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), packages = self.installed_packages.len(), "writing manifest");

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Installed packages as a name-keyed map. Names are unique across
    /// all installed packages by construction.
    pub fn package_map(&self) -> BTreeMap<String, InstalledPackage> {
        self.installed_packages
            .iter()
            .map(|ipkg| (ipkg.package.name.clone(), ipkg.clone()))
            .collect()
    }
}
