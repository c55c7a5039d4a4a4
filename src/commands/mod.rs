// src/commands/mod.rs
//! Command handlers for the grove CLI

mod bundle;
mod install;
mod query;
mod remove;
mod source;
mod state;
mod upgrade;

// Re-export all command handlers
pub use bundle::{cmd_bundle, cmd_unbundle};
pub use install::{cmd_install, cmd_test};
pub use query::{cmd_deps, cmd_info, cmd_list, cmd_search};
pub use remove::cmd_remove;
pub use source::{cmd_source_add, cmd_source_list, cmd_source_refresh};
pub use state::{cmd_load, cmd_pin, cmd_unload, cmd_unpin};
pub use upgrade::{cmd_refresh, cmd_upgrade};

use anyhow::Result;
use std::io::{BufRead, Write};

/// Ask the user to confirm a pending action on stdin.
fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;

    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Split a `path@version` argument, leaving scp-style git URLs intact.
fn split_version_suffix(arg: &str) -> (&str, &str) {
    match arg.rsplit_once('@') {
        Some((path, version)) if !version.contains('/') && !path.is_empty() => (path, version),
        _ => (arg, ""),
    }
}
