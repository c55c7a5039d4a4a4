// src/commands/query.rs
//! Read-only query commands: info, list, search, deps

use super::split_version_suffix;
use crate::cli::ListFilter;
use anyhow::{Context, Result};
use grove::{Config, InstalledPackage, Manager};

/// Show metadata, versions, and installed state for packages.
pub fn cmd_info(config: &Config, packages: &[String], version: &str) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    for arg in packages {
        let (path, suffix) = split_version_suffix(arg);
        let version = if version.is_empty() { suffix } else { version };

        let info = manager
            .info(path, version, true)
            .with_context(|| format!("failed to inspect \"{path}\""))?;

        println!("\"{}\"", info.package.qualified_name());
        println!("  url: {}", info.package.git_url);

        if let Some(reason) = &info.invalid_reason {
            println!("  invalid: {reason}");
            continue;
        }

        let description = info.metadata.description();
        if !description.is_empty() {
            println!("  description: {description}");
        }

        let versions = info.sorted_versions();
        if versions.is_empty() {
            println!("  versions: none (default branch {})", info.default_branch);
        } else {
            println!("  versions: {}", versions.join(", "));
        }

        println!(
            "  inspected: {} ({})",
            info.metadata_version, info.version_type
        );

        if let Some(status) = &info.status {
            println!("  installed: {}", status.current_version);
            println!(
                "  loaded: {}, pinned: {}, outdated: {}",
                status.is_loaded, status.is_pinned, status.is_outdated
            );
        }

        if let Ok(depends) = info.metadata.depends() {
            for (dep, spec) in depends {
                println!("  depends: {dep} ({spec})");
            }
        }
    }

    Ok(())
}

fn status_flags(ipkg: &InstalledPackage) -> String {
    let mut flags = Vec::new();

    if ipkg.is_builtin() {
        flags.push("builtin");
    }
    if ipkg.status.is_loaded {
        flags.push("loaded");
    }
    if ipkg.status.is_pinned {
        flags.push("pinned");
    }
    if ipkg.status.is_outdated {
        flags.push("outdated");
    }

    if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    }
}

/// List installed or source packages, filtered by state.
pub fn cmd_list(config: &Config, filter: ListFilter) -> Result<()> {
    let manager = Manager::new(config).context("failed to open package state")?;

    let mut installed = manager.installed_packages();
    installed.sort_by(|a, b| a.package.qualified_name().cmp(&b.package.qualified_name()));

    for ipkg in &installed {
        let keep = match filter {
            ListFilter::All | ListFilter::Installed => true,
            ListFilter::Loaded => ipkg.status.is_loaded,
            ListFilter::Unloaded => !ipkg.status.is_loaded,
            ListFilter::Outdated => ipkg.status.is_outdated,
        };

        if keep {
            println!(
                "{} ({}){}",
                ipkg.package.qualified_name(),
                ipkg.status.current_version,
                status_flags(ipkg)
            );
        }
    }

    if filter == ListFilter::All {
        let mut available = manager.source_packages()?;
        available.sort_by(|a, b| a.qualified_name().cmp(&b.qualified_name()));

        for package in available {
            let taken = installed
                .iter()
                .any(|i| i.package.git_url == package.git_url);
            if !taken {
                println!("{}", package.qualified_name());
            }
        }
    }

    Ok(())
}

/// Search source listings by name, description, and tags. Matching is
/// case-insensitive substring matching against the aggregated metadata.
pub fn cmd_search(config: &Config, terms: &[String]) -> Result<()> {
    let manager = Manager::new(config).context("failed to open package state")?;
    let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();

    let mut matches = Vec::new();

    for package in manager.source_packages()? {
        let haystack = format!(
            "{} {} {}",
            package.qualified_name().to_lowercase(),
            package.metadata.description().to_lowercase(),
            package.metadata.tags().join(" ").to_lowercase()
        );

        if terms.iter().any(|term| haystack.contains(term)) {
            matches.push(package);
        }
    }

    if matches.is_empty() {
        println!("No packages found.");
        return Ok(());
    }

    matches.sort_by(|a, b| a.qualified_name().cmp(&b.qualified_name()));

    for package in matches {
        let description = package.metadata.description();
        if description.is_empty() {
            println!("{}", package.qualified_name());
        } else {
            println!("{} - {description}", package.qualified_name());
        }
    }

    Ok(())
}

/// Print the dependency plan an install of the given packages would
/// follow, without installing anything.
pub fn cmd_deps(config: &Config, packages: &[String], ignore_suggestions: bool) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    let requested: Vec<(String, String)> = packages
        .iter()
        .map(|arg| {
            let (path, version) = split_version_suffix(arg);
            (path.to_string(), version.to_string())
        })
        .collect();

    let plan = manager
        .validate_dependencies(&requested, false, ignore_suggestions)
        .context("dependency resolution failed")?;

    if plan.is_empty() {
        println!("No additional packages are needed.");
        return Ok(());
    }

    println!("An install would add the following packages:");
    for entry in &plan {
        let tag = if entry.is_suggestion { " (suggested)" } else { "" };
        println!(
            "  {} ({}){tag}",
            entry.info.package.qualified_name(),
            entry.version
        );
    }

    Ok(())
}
