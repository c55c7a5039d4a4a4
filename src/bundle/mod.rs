// src/bundle/mod.rs

//! Self-contained package bundles for offline transfer.
//!
//! A bundle is a gzipped tar archive holding a `manifest.txt` (a JSON
//! list of `(git URL, version)` pairs) plus a clone per listed package.
//! Built-in runtime packages are recorded in the listing for
//! diagnostics but never archived; unbundling skips them.

use crate::error::{Error, Result};
use crate::git;
use crate::manager::Manager;
use crate::package::{InstalledPackage, PackageInfo};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LISTING_NAME: &str = "manifest.txt";
const CLONES_DIR: &str = "packages";

/// One line of a bundle's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub git_url: String,
    pub version: String,
    /// Recorded for diagnostics; built-ins carry no archived clone.
    #[serde(default)]
    pub is_builtin: bool,
}

/// Archive directory name for a package's clone, derived from its URL.
fn entry_dir_name(git_url: &str) -> String {
    git_url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Create a bundle at `bundle_path` from `(git URL, version)` pairs.
/// An empty version means the package's latest version. Packages
/// already installed at the requested version are archived from their
/// existing clones instead of being fetched again.
pub fn bundle(
    manager: &mut Manager,
    bundle_path: &Path,
    packages: &[(String, String)],
) -> Result<()> {
    let staging = manager.scratch_dir().join("bundle");

    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }

    std::fs::create_dir_all(&staging)?;

    let mut entries: Vec<BundleEntry> = Vec::new();
    let mut clones: Vec<(String, PathBuf)> = Vec::new();

    for (git_url, version) in packages {
        let installed = manager
            .installed_packages()
            .into_iter()
            .find(|ipkg| &ipkg.package.git_url == git_url);

        if let Some(ipkg) = installed.as_ref().filter(|i| i.is_builtin()) {
            entries.push(BundleEntry {
                git_url: git_url.clone(),
                version: ipkg.status.current_version.clone(),
                is_builtin: true,
            });
            continue;
        }

        let (version, clone_path) = match installed
            .filter(|i| version.is_empty() || &i.status.current_version == version)
        {
            Some(ipkg) => {
                let path = manager.package_clone_path(&ipkg.package.name);
                (ipkg.status.current_version.clone(), path)
            }
            None => {
                let dest = staging.join(entry_dir_name(git_url));
                let repo = git::clone(git_url, &dest, false)?;

                let version = if version.is_empty() {
                    git::default_branch(&repo)?
                } else {
                    git::checkout(&repo, version)?;
                    version.clone()
                };

                (version, dest)
            }
        };

        debug!(url = %git_url, %version, "bundling");
        entries.push(BundleEntry {
            git_url: git_url.clone(),
            version,
            is_builtin: false,
        });
        clones.push((git_url.clone(), clone_path));
    }

    write_archive(bundle_path, &entries, &clones)?;
    info!(bundle = %bundle_path.display(), packages = entries.len(), "bundle written");
    Ok(())
}

fn write_archive(
    bundle_path: &Path,
    entries: &[BundleEntry],
    clones: &[(String, PathBuf)],
) -> Result<()> {
    let file = File::create(bundle_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut archive = tar::Builder::new(encoder);

    let listing = serde_json::to_vec_pretty(entries)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(listing.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    archive.append_data(&mut header, LISTING_NAME, listing.as_slice())?;

    for (git_url, clone_path) in clones {
        let dir = format!("{CLONES_DIR}/{}", entry_dir_name(git_url));
        archive.append_dir_all(&dir, clone_path)?;
    }

    archive.into_inner()?.finish()?;
    Ok(())
}

/// Extract a bundle into a scratch directory and return its listing
/// with the local path of each archived clone.
pub fn read_bundle(
    bundle_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<(BundleEntry, Option<PathBuf>)>> {
    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir)?;
    }

    std::fs::create_dir_all(dest_dir)?;

    let file = File::open(bundle_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.unpack(dest_dir)?;

    let listing_path = dest_dir.join(LISTING_NAME);
    let listing = std::fs::read_to_string(&listing_path).map_err(|_| {
        Error::NotFound(format!(
            "{} has no {LISTING_NAME}, not a bundle?",
            bundle_path.display()
        ))
    })?;
    let entries: Vec<BundleEntry> = serde_json::from_str(&listing)?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let clone = dest_dir
                .join(CLONES_DIR)
                .join(entry_dir_name(&entry.git_url));
            let clone = clone.exists().then_some(clone);
            (entry, clone)
        })
        .collect())
}

/// Install every archived package of a bundle. Built-in entries are
/// skipped; they ship with the runtime.
pub fn unbundle(manager: &mut Manager, bundle_path: &Path) -> Result<Vec<InstalledPackage>> {
    let dest = manager.scratch_dir().join("unbundle");
    let entries = read_bundle(bundle_path, &dest)?;
    let mut installed = Vec::new();

    for (entry, clone) in entries {
        let Some(clone) = clone else {
            debug!(url = %entry.git_url, "skipping built-in bundle entry");
            continue;
        };

        let ipkg = manager.install_from_clone(&entry.git_url, &clone, &entry.version)?;
        installed.push(ipkg);
    }

    Ok(installed)
}

/// Inspect a bundle's packages without installing anything.
pub fn bundle_info(manager: &mut Manager, bundle_path: &Path) -> Result<Vec<PackageInfo>> {
    let dest = manager.scratch_dir().join("bundle-info");
    let entries = read_bundle(bundle_path, &dest)?;
    let mut infos = Vec::new();

    for (entry, clone) in entries {
        match clone {
            Some(clone) => {
                let info =
                    manager.info(&clone.to_string_lossy(), &entry.version, false)?;
                infos.push(info);
            }
            None => infos.push(PackageInfo::builtin(
                &entry.git_url,
                &entry.version,
                "",
            )),
        }
    }

    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::git::testutil;

    fn manager_in(state: &Path) -> Manager {
        let mut config = Config::default();
        config.paths.state_dir = state.to_path_buf();
        Manager::new(&config).unwrap()
    }

    fn make_package(root: &Path, name: &str, tag: &str) -> String {
        let dir = root.join(name);
        testutil::init_repo(
            &dir,
            &[("grove.meta", "[package]\n"), ("__load__.gv", "# entry\n")],
        );
        let repo = git2::Repository::open(&dir).unwrap();
        testutil::tag_head(&repo, tag);
        dir.to_string_lossy().into_owned()
    }

    #[test]
    fn test_listing_round_trip() {
        let upstream = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let mut manager = manager_in(state.path());

        let foo = make_package(upstream.path(), "foo", "v1.0.0");
        let bar = make_package(upstream.path(), "bar", "v2.0.0");

        let bundle_path = state.path().join("packages.bundle");
        bundle(
            &mut manager,
            &bundle_path,
            &[(foo.clone(), "v1.0.0".to_string()), (bar.clone(), String::new())],
        )
        .unwrap();

        let dest = state.path().join("extract");
        let entries = read_bundle(&bundle_path, &dest).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.git_url, foo);
        assert_eq!(entries[0].0.version, "v1.0.0");
        assert!(entries.iter().all(|(_, clone)| clone.is_some()));
    }

    #[test]
    fn test_unbundle_installs_with_original_identity() {
        let upstream = tempfile::tempdir().unwrap();
        let state_a = tempfile::tempdir().unwrap();
        let state_b = tempfile::tempdir().unwrap();

        let foo = make_package(upstream.path(), "foo", "v1.0.0");

        let mut source_manager = manager_in(state_a.path());
        let bundle_path = state_a.path().join("packages.bundle");
        bundle(
            &mut source_manager,
            &bundle_path,
            &[(foo.clone(), "v1.0.0".to_string())],
        )
        .unwrap();

        let mut target_manager = manager_in(state_b.path());
        let installed = unbundle(&mut target_manager, &bundle_path).unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].package.git_url, foo);
        assert_eq!(installed[0].status.current_version, "v1.0.0");
        assert!(target_manager.find_installed_package("foo").is_some());
    }

    #[test]
    fn test_not_a_bundle_is_error() {
        let state = tempfile::tempdir().unwrap();
        let path = state.path().join("bogus.bundle");

        // A gzipped tar with no listing inside.
        let file = File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut archive = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        archive.append_data(&mut header, "hi", &b"hi"[..]).unwrap();
        archive.into_inner().unwrap().finish().unwrap();

        let dest = state.path().join("extract");
        assert!(read_bundle(&path, &dest).is_err());
    }
}
