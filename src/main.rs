// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, SourceCommands};
use grove::metadata::parse_user_var_arg;
use grove::Config;
use std::path::PathBuf;

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(std::path::Path::new(path))?,
        None => Config::load_default()?,
    };

    for arg in &cli.user_vars {
        let (name, value) = parse_user_var_arg(arg).map_err(|err| anyhow::anyhow!(err))?;
        config.user_vars.insert(name, value);
    }

    let config_path = match &cli.config {
        Some(path) => PathBuf::from(path),
        None => config.state_dir().join("config.toml"),
    };

    match cli.command {
        Some(Commands::Install {
            packages,
            version,
            skip_deps,
            ignore_suggestions,
            force,
        }) => commands::cmd_install(
            &config,
            &packages,
            &version,
            skip_deps,
            ignore_suggestions,
            force,
        ),
        Some(Commands::Remove { packages, force }) => {
            commands::cmd_remove(&config, &packages, force)
        }
        Some(Commands::Test { packages, version }) => {
            commands::cmd_test(&config, &packages, &version)
        }
        Some(Commands::Upgrade { packages }) => commands::cmd_upgrade(&config, &packages),
        Some(Commands::Refresh) => commands::cmd_refresh(&config),
        Some(Commands::Pin { packages }) => commands::cmd_pin(&config, &packages),
        Some(Commands::Unpin { packages }) => commands::cmd_unpin(&config, &packages),
        Some(Commands::Load {
            packages,
            with_deps,
        }) => commands::cmd_load(&config, &packages, with_deps),
        Some(Commands::Unload {
            packages,
            with_unused_deps,
        }) => commands::cmd_unload(&config, &packages, with_unused_deps),
        Some(Commands::Info { packages, version }) => {
            commands::cmd_info(&config, &packages, &version)
        }
        Some(Commands::List { filter }) => commands::cmd_list(&config, filter),
        Some(Commands::Search { terms }) => commands::cmd_search(&config, &terms),
        Some(Commands::Deps {
            packages,
            ignore_suggestions,
        }) => commands::cmd_deps(&config, &packages, ignore_suggestions),
        Some(Commands::Source { command }) => match command {
            SourceCommands::Add { name, url } => {
                commands::cmd_source_add(&config, &config_path, &name, &url)
            }
            SourceCommands::List => commands::cmd_source_list(&config),
            SourceCommands::Refresh { name } => {
                commands::cmd_source_refresh(&config, name.as_deref())
            }
        },
        Some(Commands::Bundle {
            bundle_path,
            packages,
        }) => commands::cmd_bundle(&config, &bundle_path, &packages),
        Some(Commands::Unbundle {
            bundle_path,
            dry_run,
        }) => commands::cmd_unbundle(&config, &bundle_path, dry_run),
        None => {
            println!("Grove Package Manager v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'grove --help' for usage information");
            Ok(())
        }
    }
}
