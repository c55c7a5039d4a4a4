// src/lib.rs

//! Grove Package Manager
//!
//! Git-native package manager for runtime script and plugin packages.
//!
//! # Architecture
//!
//! - Sources: cloned git repositories listing package URLs plus an
//!   aggregated metadata cache for offline search
//! - Packages: one git clone each, installed at a tag, branch, or
//!   commit, staged into script/plugin/bin trees
//! - Manifest: a single JSON document holding all installed state,
//!   rewritten whole on every mutation
//! - Resolver: breadth-first dependency planning over qualified
//!   package names with semver-coerced version tags

pub mod bundle;
pub mod config;
mod error;
pub mod git;
pub mod manager;
pub mod manifest;
pub mod metadata;
pub mod package;
pub mod resolver;
pub mod source;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use manager::Manager;
pub use package::{InstalledPackage, Package, PackageInfo, PackageStatus};
pub use resolver::{DependencyGraph, PlanEntry};
pub use version::{PackageVersion, TrackingMethod, VersionSpec};
