// src/commands/state.rs
//! Pin, unpin, load, and unload commands

use anyhow::{Context, Result};
use grove::{Config, Manager};

pub fn cmd_pin(config: &Config, packages: &[String]) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    for pkg_path in packages {
        let ipkg = manager
            .pin(pkg_path)
            .with_context(|| format!("failed to pin \"{pkg_path}\""))?;
        println!(
            "Pinned {} at {}",
            ipkg.package.qualified_name(),
            ipkg.status.current_version
        );
    }

    Ok(())
}

pub fn cmd_unpin(config: &Config, packages: &[String]) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    for pkg_path in packages {
        let ipkg = manager
            .unpin(pkg_path)
            .with_context(|| format!("failed to unpin \"{pkg_path}\""))?;
        println!("Unpinned {}", ipkg.package.qualified_name());
    }

    Ok(())
}

pub fn cmd_load(config: &Config, packages: &[String], with_deps: bool) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    for pkg_path in packages {
        if with_deps {
            let loaded = manager
                .load_with_dependencies(pkg_path)
                .with_context(|| format!("failed to load \"{pkg_path}\""))?;
            for name in loaded {
                println!("Loaded {name}");
            }
        } else {
            manager
                .load(pkg_path)
                .with_context(|| format!("failed to load \"{pkg_path}\""))?;
            println!("Loaded {pkg_path}");
        }
    }

    Ok(())
}

pub fn cmd_unload(config: &Config, packages: &[String], with_unused_deps: bool) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    for pkg_path in packages {
        if with_unused_deps {
            let unloaded = manager
                .unload_with_unused_dependers(pkg_path)
                .with_context(|| format!("failed to unload \"{pkg_path}\""))?;
            for name in unloaded {
                println!("Unloaded {name}");
            }
        } else {
            manager
                .unload(pkg_path)
                .with_context(|| format!("failed to unload \"{pkg_path}\""))?;
            println!("Unloaded {pkg_path}");
        }
    }

    Ok(())
}
