mod cli;
mod commands;
pub mod core;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::core::paths::LauncherPaths;

pub fn run() {
    let cli = Cli::parse();

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,launchkeeper_lib=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Launchkeeper {} starting...", env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: cannot start async runtime: {err}");
            std::process::exit(1);
        }
    };

    let paths = match cli.home {
        Some(home) => LauncherPaths::rooted_at(&home),
        None => LauncherPaths::from_platform(),
    };

    let result = runtime.block_on(async move {
        match cli.command {
            Commands::Launch(args) => commands::launch(paths, args).await,
            Commands::Registry(command) => commands::registry(paths, command).await,
            Commands::Probe(args) => commands::probe(paths, args).await,
            Commands::Settings(args) => commands::settings(paths, args).await,
        }
    });

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!("{err}");
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
