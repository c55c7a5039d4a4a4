// src/metadata/mod.rs

//! Package metadata file parsing.
//!
//! A package declares its facts in a `grove.meta` file (legacy name
//! `pkg.meta`) at its repository root: an INI-style file whose
//! `[package]` section holds `key = value` pairs. A missing file or a
//! missing `[package]` section is a hard validation failure for that
//! package. Source repositories reuse the same format for their
//! `aggregate.meta` metadata cache.

use crate::package::{is_valid_package_name, Metadata};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Preferred metadata file name.
pub const METADATA_FILENAME: &str = "grove.meta";

/// Older metadata file name, still accepted.
pub const LEGACY_METADATA_FILENAME: &str = "pkg.meta";

/// Choose the metadata file within a package checkout, preferring the
/// newer name.
pub fn pick_metadata_file(dir: &Path) -> PathBuf {
    let preferred = dir.join(METADATA_FILENAME);

    if preferred.exists() {
        preferred
    } else {
        dir.join(LEGACY_METADATA_FILENAME)
    }
}

/// Parse an INI document into section -> (key -> value) maps.
///
/// Keys are lowercased. Indented lines continue the previous value,
/// joined with a newline, matching the multi-line fields (`depends`,
/// `user_vars`) packages use in practice.
pub fn parse_ini(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current_section = String::new();
    let mut current_key = String::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            current_section = trimmed[1..trimmed.len() - 1].trim().to_string();
            current_key.clear();
            sections.entry(current_section.clone()).or_default();
            continue;
        }

        let is_continuation = line.starts_with([' ', '\t']) && !current_key.is_empty();

        if is_continuation {
            if let Some(section) = sections.get_mut(&current_section) {
                if let Some(value) = section.get_mut(&current_key) {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                }
            }
            continue;
        }

        if let Some((key, value)) = trimmed.split_once('=') {
            current_key = key.trim().to_lowercase();
            sections
                .entry(current_section.clone())
                .or_default()
                .insert(current_key.clone(), value.trim().to_string());
        }
    }

    sections
}

/// Parse the `[package]` section of a package's metadata file.
///
/// Returns the metadata, or a string explaining why the package is
/// invalid (the caller propagates it as the package's invalid reason).
pub fn parse_package_metadata(metadata_file: &Path) -> std::result::Result<Metadata, String> {
    let text = match std::fs::read_to_string(metadata_file) {
        Ok(text) => text,
        Err(_) => {
            warn!("{}: missing metadata file", metadata_file.display());
            return Err(format!(
                "missing {METADATA_FILENAME} (or {LEGACY_METADATA_FILENAME}) metadata file"
            ));
        }
    };

    let mut sections = parse_ini(&text);

    let Some(fields) = sections.remove("package") else {
        warn!("{}: metadata missing [package]", metadata_file.display());
        let basename = metadata_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(format!("{basename} is missing [package] section"));
    };

    let metadata = Metadata::new(fields);

    for alias in metadata.aliases() {
        if !is_valid_package_name(&alias) {
            return Err(format!("invalid alias \"{alias}\""));
        }
    }

    Ok(metadata)
}

/// Substitute `${name}` placeholders in every metadata value.
///
/// Substitution values come from, in priority order: the process
/// environment, the configured user variables, and the defaults the
/// package declares in its `user_vars` field. `${runtime_dist}` and
/// `${package_base}` are always available.
pub fn interpolate_metadata(
    metadata: &Metadata,
    runtime_dist: &str,
    package_base: &str,
    user_vars: &BTreeMap<String, String>,
) -> std::result::Result<Metadata, String> {
    let declared = metadata
        .user_vars()
        .map_err(|_| "package has malformed 'user_vars' metadata field".to_string())?;

    let mut substitutions: BTreeMap<String, String> = BTreeMap::new();
    substitutions.insert("runtime_dist".to_string(), runtime_dist.to_string());
    substitutions.insert("package_base".to_string(), package_base.to_string());

    for (name, value) in user_vars {
        substitutions.insert(name.clone(), value.clone());
    }

    for uvar in &declared {
        if let Ok(from_env) = std::env::var(&uvar.name) {
            substitutions.insert(uvar.name.clone(), from_env);
        } else if !substitutions.contains_key(&uvar.name) {
            substitutions.insert(uvar.name.clone(), uvar.default.clone());
        }
    }

    let mut fields = BTreeMap::new();

    for (key, value) in &metadata.0 {
        fields.insert(key.clone(), substitute(value, &substitutions));
    }

    Ok(Metadata::new(fields))
}

fn substitute(value: &str, substitutions: &BTreeMap<String, String>) -> String {
    let mut result = value.to_string();

    for (name, replacement) in substitutions {
        result = result.replace(&format!("${{{name}}}"), replacement);
    }

    result
}

// Re-exported for CLI `--user-var NAME=VALUE` parsing.
pub fn parse_user_var_arg(arg: &str) -> std::result::Result<(String, String), String> {
    arg.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("invalid user var argument \"{arg}\", must be NAME=VALUE"))
}
