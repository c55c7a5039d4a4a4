// src/commands/source.rs
//! Source management commands

use anyhow::{Context, Result};
use grove::{Config, Manager};
use std::path::Path;

/// Add a source binding: clone it to validate the URL, then persist
/// the binding in the configuration file.
pub fn cmd_source_add(config: &Config, config_path: &Path, name: &str, url: &str) -> Result<()> {
    let mut manager = Manager::new(config).context("failed to open package state")?;
    manager
        .add_source(name, url)
        .with_context(|| format!("failed to add source \"{name}\""))?;

    let mut table: toml::Table = if config_path.exists() {
        std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?
            .parse()
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        toml::Table::new()
    };

    let sources = table
        .entry("sources")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    let sources = sources.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!("\"sources\" in {} is not a table", config_path.display())
    })?;
    sources.insert(name.to_string(), toml::Value::String(url.to_string()));

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, toml::to_string_pretty(&table)?)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    println!("Added source \"{name}\" ({url})");
    Ok(())
}

pub fn cmd_source_list(config: &Config) -> Result<()> {
    let manager = Manager::new(config).context("failed to open package state")?;

    for source in manager.sources() {
        println!("{} ({})", source.name, source.git_url);
    }

    Ok(())
}

/// Refresh one source's listing, or all of them.
pub fn cmd_source_refresh(config: &Config, name: Option<&str>) -> Result<()> {
    let manager = Manager::new(config).context("failed to open package state")?;

    let names: Vec<String> = match name {
        Some(name) => vec![name.to_string()],
        None => manager.sources().map(|s| s.name.clone()).collect(),
    };

    for name in &names {
        manager
            .refresh_source(name)
            .with_context(|| format!("failed to refresh source \"{name}\""))?;
        println!("Refreshed source \"{name}\"");
    }

    Ok(())
}
