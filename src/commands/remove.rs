// src/commands/remove.rs
//! Package removal command

use super::confirm;
use anyhow::{Context, Result};
use grove::{Config, Manager};

/// Remove installed packages, warning when other packages depend on
/// them.
pub fn cmd_remove(config: &Config, packages: &[String], force: bool) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;

    for pkg_path in packages {
        let dependers = manager.list_depender_pkgs(pkg_path);

        if !dependers.is_empty() {
            println!("The following installed packages depend on \"{pkg_path}\":");
            for ipkg in &dependers {
                println!("  {}", ipkg.package.qualified_name());
            }

            if !force && !confirm("Remove anyway?")? {
                println!("Skipping \"{pkg_path}\".");
                continue;
            }
        }

        manager
            .remove(pkg_path)
            .with_context(|| format!("failed to remove \"{pkg_path}\""))?;
        println!("Removed {pkg_path}");
    }

    Ok(())
}
