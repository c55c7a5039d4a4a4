// src/cli.rs
//! CLI definitions for the grove package manager
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "grove")]
#[command(version)]
#[command(about = "Git-native package manager for runtime packages", long_about = None)]
pub struct Cli {
    /// Path to the configuration file (default: ~/.grove/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Override a package user variable (repeatable)
    #[arg(long = "user-var", value_name = "NAME=VALUE", global = true)]
    pub user_vars: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install packages along with their dependencies
    Install {
        /// Package names, source paths, or git URLs
        #[arg(required = true)]
        packages: Vec<String>,

        /// Version tag, branch, or commit to install (single package only)
        #[arg(short, long, default_value = "")]
        version: String,

        /// Skip dependency resolution and install only the named packages
        #[arg(long)]
        skip_deps: bool,

        /// Leave suggested packages out of the dependency plan
        #[arg(long)]
        ignore_suggestions: bool,

        /// Proceed without asking for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Remove installed packages
    Remove {
        /// Package names, source paths, or git URLs
        #[arg(required = true)]
        packages: Vec<String>,

        /// Proceed without asking for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Run package test suites in scratch clones
    Test {
        /// Package names, source paths, or git URLs
        #[arg(required = true)]
        packages: Vec<String>,

        /// Version tag, branch, or commit to test (single package only)
        #[arg(short, long, default_value = "")]
        version: String,
    },

    /// Upgrade installed packages to their newest eligible version
    Upgrade {
        /// Package names to upgrade (default: every outdated package)
        packages: Vec<String>,
    },

    /// Fetch source listings and recheck installed packages for updates
    Refresh,

    /// Pin packages to their currently installed version
    Pin {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Unpin packages so upgrades apply again
    Unpin {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Mark installed packages as loaded by the runtime
    Load {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Also load any unloaded installed dependencies
        #[arg(long)]
        with_deps: bool,
    },

    /// Mark loaded packages as unloaded
    Unload {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Also unload dependencies nothing else still needs
        #[arg(long)]
        with_unused_deps: bool,
    },

    /// Show metadata and versions for packages
    Info {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Inspect a specific version instead of the newest
        #[arg(short, long, default_value = "")]
        version: String,
    },

    /// List packages
    List {
        /// Which packages to list
        #[arg(value_enum, default_value_t = ListFilter::Installed)]
        filter: ListFilter,
    },

    /// Search source packages by name, description, or tags
    Search {
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Show the dependency plan an install would follow
    Deps {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Leave suggested packages out of the plan
        #[arg(long)]
        ignore_suggestions: bool,
    },

    /// Manage package sources
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Write installed packages into a portable bundle archive
    Bundle {
        /// Path of the bundle file to create
        bundle_path: String,

        /// Packages to include, each optionally suffixed with @VERSION
        /// (default: every installed package)
        packages: Vec<String>,
    },

    /// Install every package carried by a bundle archive
    Unbundle {
        /// Path of the bundle file to read
        bundle_path: String,

        /// List the bundle's packages without installing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum SourceCommands {
    /// Add a source binding to the configuration file
    Add {
        /// Short name the source's packages are qualified with
        name: String,
        /// Git URL of the source repository
        url: String,
    },

    /// List configured sources
    List,

    /// Fetch the newest listing for one source (default: all)
    Refresh {
        name: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFilter {
    /// Every package known to any source, plus installed ones
    All,
    /// Installed packages only
    Installed,
    /// Installed packages marked loaded
    Loaded,
    /// Installed packages not marked loaded
    Unloaded,
    /// Installed packages with a newer eligible version
    Outdated,
}
