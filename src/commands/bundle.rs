// src/commands/bundle.rs
//! Bundle creation and installation commands

use super::split_version_suffix;
use anyhow::{Context, Result};
use grove::package::canonical_url;
use grove::{bundle, Config, Manager};
use std::path::Path;

/// Resolve a user-supplied package token to a git URL.
fn resolve_git_url(manager: &Manager, path: &str) -> Result<String> {
    if let Some(ipkg) = manager.find_installed_package(path) {
        return Ok(ipkg.package.git_url);
    }

    let matches = manager.match_source_packages(path)?;

    match matches.len() {
        1 => Ok(matches[0].git_url.clone()),
        0 if path.contains('/') => Ok(canonical_url(path)),
        0 => Err(anyhow::anyhow!("no such package \"{path}\"")),
        _ => Err(anyhow::anyhow!(
            "\"{path}\" is ambiguous: {}",
            matches
                .iter()
                .map(|p| p.qualified_name())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

/// Write a bundle of the named packages, or of everything installed.
pub fn cmd_bundle(config: &Config, bundle_path: &str, packages: &[String]) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    let entries: Vec<(String, String)> = if packages.is_empty() {
        manager
            .installed_packages()
            .into_iter()
            .map(|i| (i.package.git_url, i.status.current_version))
            .collect()
    } else {
        packages
            .iter()
            .map(|arg| {
                let (path, version) = split_version_suffix(arg);
                let url = resolve_git_url(&manager, path)?;
                Ok((url, version.to_string()))
            })
            .collect::<Result<_>>()?
    };

    if entries.is_empty() {
        return Err(anyhow::anyhow!("nothing to bundle"));
    }

    bundle::bundle(&mut manager, Path::new(bundle_path), &entries)
        .context("failed to write bundle")?;
    println!("Bundled {} package(s) into {bundle_path}", entries.len());
    Ok(())
}

/// Install a bundle's packages, or list them with `--dry-run`.
pub fn cmd_unbundle(config: &Config, bundle_path: &str, dry_run: bool) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;
    let path = Path::new(bundle_path);

    if dry_run {
        let infos = bundle::bundle_info(&mut manager, path)
            .with_context(|| format!("failed to read {bundle_path}"))?;

        println!("{bundle_path} contains:");
        for info in infos {
            match &info.invalid_reason {
                Some(reason) => println!(
                    "  {} (invalid: {reason})",
                    info.package.qualified_name()
                ),
                None => println!(
                    "  {} ({})",
                    info.package.qualified_name(),
                    info.metadata_version
                ),
            }
        }

        return Ok(());
    }

    let installed = bundle::unbundle(&mut manager, path)
        .with_context(|| format!("failed to unbundle {bundle_path}"))?;

    for ipkg in installed {
        println!(
            "Installed {} ({})",
            ipkg.package.qualified_name(),
            ipkg.status.current_version
        );
    }

    Ok(())
}
