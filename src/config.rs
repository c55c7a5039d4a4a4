// src/config.rs
//! TOML configuration for the grove engine.
//!
//! Sections:
//! - [paths] - state, script, plugin, and bin directories
//! - [runtime] - host runtime executable used for introspection
//! - [sources] - source name to git URL bindings
//! - [user_vars] - values for package-declared user variables

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration file structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub runtime: RuntimeSection,

    /// Source name -> git URL.
    #[serde(default)]
    pub sources: BTreeMap<String, String>,

    /// Values for `${name}` placeholders in package metadata.
    #[serde(default)]
    pub user_vars: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct PathsSection {
    /// Root for clones, scratch space, logs, and the manifest.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Staging area for package scripts; defaults under the state dir.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Staging area for built plugins; defaults under the state dir.
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,

    /// Link farm for package executables; defaults under the state dir.
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            script_dir: None,
            plugin_dir: None,
            bin_dir: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RuntimeSection {
    /// Executable queried for the runtime version and its built-in
    /// packages. Introspection is skipped when unset.
    #[serde(default)]
    pub exe: Option<String>,

    /// Overrides the version reported by the executable.
    #[serde(default)]
    pub version: Option<String>,
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".grove")
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("failed to read {}: {err}", path.display()))
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|err| {
            Error::Config(format!("failed to parse {}: {err}", path.display()))
        })?;

        config.expand_paths();
        Ok(config)
    }

    /// Load `config.toml` from the default state directory when it
    /// exists, else the built-in defaults.
    pub fn load_default() -> Result<Self> {
        let path = default_state_dir().join("config.toml");

        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn expand_paths(&mut self) {
        let expand = |p: &PathBuf| -> PathBuf {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).into_owned())
        };

        self.paths.state_dir = expand(&self.paths.state_dir);
        self.paths.script_dir = self.paths.script_dir.as_ref().map(&expand);
        self.paths.plugin_dir = self.paths.plugin_dir.as_ref().map(&expand);
        self.paths.bin_dir = self.paths.bin_dir.as_ref().map(&expand);
    }

    pub fn state_dir(&self) -> &Path {
        &self.paths.state_dir
    }

    pub fn script_dir(&self) -> PathBuf {
        self.paths
            .script_dir
            .clone()
            .unwrap_or_else(|| self.paths.state_dir.join("script_dir"))
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.paths
            .plugin_dir
            .clone()
            .unwrap_or_else(|| self.paths.state_dir.join("plugin_dir"))
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.paths
            .bin_dir
            .clone()
            .unwrap_or_else(|| self.paths.state_dir.join("bin"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.sources.is_empty());
        assert_eq!(config.script_dir(), config.state_dir().join("script_dir"));
        assert_eq!(config.bin_dir(), config.state_dir().join("bin"));
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[paths]
state_dir = "/var/lib/grove"
script_dir = "/opt/runtime/share/scripts"

[runtime]
exe = "/opt/runtime/bin/runtime"

[sources]
zeal = "https://example.com/zeal-packages"

[user_vars]
KAFKA_ROOT = "/opt/kafka"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.state_dir(), Path::new("/var/lib/grove"));
        assert_eq!(
            config.script_dir(),
            PathBuf::from("/opt/runtime/share/scripts")
        );
        assert_eq!(config.plugin_dir(), PathBuf::from("/var/lib/grove/plugin_dir"));
        assert_eq!(
            config.sources.get("zeal").unwrap(),
            "https://example.com/zeal-packages"
        );
        assert_eq!(config.user_vars.get("KAFKA_ROOT").unwrap(), "/opt/kafka");
        assert_eq!(config.runtime.exe.as_deref(), Some("/opt/runtime/bin/runtime"));
    }

    #[test]
    fn test_malformed_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[paths\nstate_dir=").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
