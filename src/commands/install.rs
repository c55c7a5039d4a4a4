// src/commands/install.rs
//! Package installation command

use super::{confirm, split_version_suffix};
use anyhow::{Context, Result};
use grove::{Config, Manager};
use tracing::info;

/// Install packages, planning and installing dependencies first.
pub fn cmd_install(
    config: &Config,
    packages: &[String],
    version: &str,
    skip_deps: bool,
    ignore_suggestions: bool,
    force: bool,
) -> Result<()> {
    if !version.is_empty() && packages.len() > 1 {
        return Err(anyhow::anyhow!(
            "--version applies to a single package, got {}",
            packages.len()
        ));
    }

    let mut manager = Manager::new(config).context("failed to open package state")?;

    let requested: Vec<(String, String)> = packages
        .iter()
        .map(|arg| {
            let (path, suffix) = split_version_suffix(arg);
            let version = if version.is_empty() { suffix } else { version };
            (path.to_string(), version.to_string())
        })
        .collect();

    if !skip_deps {
        let plan = manager
            .validate_dependencies(&requested, false, ignore_suggestions)
            .context("dependency resolution failed")?;

        if !plan.is_empty() {
            println!("The following dependencies will be installed:");
            for entry in &plan {
                let tag = if entry.is_suggestion { " (suggested)" } else { "" };
                println!(
                    "  {} ({}){tag}",
                    entry.info.package.qualified_name(),
                    entry.version
                );
            }

            if !force && !confirm("Proceed?")? {
                println!("Aborted.");
                return Ok(());
            }

            // The plan is ordered root to leaf; install leaves first.
            for entry in plan.iter().rev() {
                let name = entry.info.package.qualified_name();
                info!(package = %name, version = %entry.version, "installing dependency");
                let ipkg = manager
                    .install(&name, &entry.version)
                    .with_context(|| format!("failed to install dependency \"{name}\""))?;
                println!(
                    "Installed {} ({})",
                    ipkg.package.qualified_name(),
                    ipkg.status.current_version
                );
            }
        }
    }

    for (path, version) in &requested {
        let ipkg = manager
            .install(path, version)
            .with_context(|| format!("failed to install \"{path}\""))?;
        println!(
            "Installed {} ({})",
            ipkg.package.qualified_name(),
            ipkg.status.current_version
        );
    }

    Ok(())
}

/// Run package test suites in scratch clones.
pub fn cmd_test(config: &Config, packages: &[String], version: &str) -> Result<()> {
    if !version.is_empty() && packages.len() > 1 {
        return Err(anyhow::anyhow!(
            "--version applies to a single package, got {}",
            packages.len()
        ));
    }

    let mut manager = Manager::new(config).context("failed to open package state")?;

    for arg in packages {
        let (path, suffix) = split_version_suffix(arg);
        let version = if version.is_empty() { suffix } else { version };

        let log = manager
            .test(path, version)
            .with_context(|| format!("tests for \"{path}\" failed"))?;
        println!("Tests for {path} passed, log at {}", log.display());
    }

    Ok(())
}
