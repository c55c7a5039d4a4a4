// src/error.rs

//! Error types shared across the grove engine.
//!
//! Library code returns `Error` values; the command layer translates them
//! into human-readable messages. Nothing escapes a public operation as a
//! panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A user-supplied path matched no package, or the input was otherwise
    /// not resolvable to a single package.
    #[error("{0}")]
    NotFound(String),

    /// A user-supplied path matched more than one package. The message
    /// lists every qualified name so the caller can disambiguate.
    #[error("{0}")]
    Ambiguous(String),

    /// A package's metadata file is missing or malformed.
    #[error("{0}")]
    Metadata(String),

    /// A requested or installed version is incompatible with a depender's
    /// requirement. Always names both parties and both version strings.
    #[error("{0}")]
    Conflict(String),

    /// An installed package's name or alias collides with another.
    #[error("{0}")]
    NameCollision(String),

    /// A lifecycle precondition failed (not installed, pinned, not
    /// outdated, nothing to load, ...).
    #[error("{0}")]
    Lifecycle(String),

    /// Staging a package's scripts/plugins/executables failed.
    #[error("{0}")]
    Staging(String),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
