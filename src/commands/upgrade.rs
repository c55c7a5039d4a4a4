// src/commands/upgrade.rs
//! Upgrade and refresh commands

use anyhow::{Context, Result};
use grove::{Config, Manager};
use tracing::info;

/// Upgrade the named packages, or every outdated one when none are
/// named. Pinned and commit-tracking packages are left alone in the
/// upgrade-all case.
pub fn cmd_upgrade(config: &Config, packages: &[String]) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    let targets: Vec<String> = if packages.is_empty() {
        manager
            .installed_packages()
            .into_iter()
            .filter(|p| p.status.is_outdated && !p.status.is_pinned && !p.is_builtin())
            .map(|p| p.package.name)
            .collect()
    } else {
        packages.to_vec()
    };

    if targets.is_empty() {
        println!("All packages are up to date.");
        return Ok(());
    }

    for pkg_path in &targets {
        info!(package = %pkg_path, "upgrading");
        let ipkg = manager
            .upgrade(pkg_path)
            .with_context(|| format!("failed to upgrade \"{pkg_path}\""))?;
        println!(
            "Upgraded {} to {}",
            ipkg.package.qualified_name(),
            ipkg.status.current_version
        );
    }

    Ok(())
}

/// Fetch every source listing, refetch installed clones, and report
/// which packages now have a newer eligible version.
pub fn cmd_refresh(config: &Config) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    let names: Vec<String> = manager.sources().map(|s| s.name.clone()).collect();
    for name in &names {
        manager
            .refresh_source(name)
            .with_context(|| format!("failed to refresh source \"{name}\""))?;
        println!("Refreshed source \"{name}\"");
    }

    manager
        .refresh_installed_packages()
        .context("failed to refresh installed packages")?;

    let outdated: Vec<_> = manager
        .installed_packages()
        .into_iter()
        .filter(|p| p.status.is_outdated)
        .collect();

    if outdated.is_empty() {
        println!("All installed packages are up to date.");
    } else {
        println!("Outdated packages:");
        for ipkg in outdated {
            println!(
                "  {} ({})",
                ipkg.package.qualified_name(),
                ipkg.status.current_version
            );
        }
    }

    Ok(())
}
