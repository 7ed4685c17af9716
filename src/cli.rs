// ─── Command-line definitions ───

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Launchkeeper - find, fetch, verify and launch purchased products
#[derive(Parser, Debug)]
#[command(
    name = "launchkeeper",
    author,
    version,
    about = "Acquire, validate and launch purchased products",
    after_help = "Examples:\n  \
                  launchkeeper launch --product acme.json\n  \
                  launchkeeper launch --product acme.json --yes -- --safe-mode\n  \
                  launchkeeper registry list\n  \
                  launchkeeper probe ./AcmeStudio.exe --product acme.json"
)]
pub struct Cli {
    /// Keep all launcher state under this directory instead of the
    /// per-user platform directories
    #[arg(long, global = true, env = "LAUNCHKEEPER_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a product (registry, discovery or download) and run it
    Launch(LaunchArgs),

    /// Inspect or edit the product -> executable registry
    #[command(subcommand)]
    Registry(RegistryCommand),

    /// Show the identity metadata of an executable
    Probe(ProbeArgs),

    /// Print the effective launcher settings
    Settings(SettingsArgs),
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Product record as JSON
    #[arg(long, short = 'p')]
    pub product: PathBuf,

    /// Answer every question without prompting (download, run installers)
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Arguments passed through to the product
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum RegistryCommand {
    /// List registered executables
    List,
    /// Drop the registered executable of a product
    Forget {
        /// Product id
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Executable to inspect
    pub path: PathBuf,

    /// Also validate against this product record
    #[arg(long, short = 'p')]
    pub product: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Write the effective settings back to disk
    #[arg(long)]
    pub save: bool,
}
