//! permsync: permission synchronization between an authoritative model and
//! its materialized state.
//!
//! # Usage
//!
//! ```text
//! permsync sync check|info|wait|cancel|confirm
//! permsync sync custom <instance>...
//! permsync sync job <job-id>
//! permsync status [--json]
//! permsync diff <instance>
//! permsync daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, diff::DiffArgs, status::StatusArgs, sync::SyncCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "permsync",
    version,
    about = "Check, confirm and apply permission synchronizations",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the daemon's synchronization coordinator.
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },

    /// Show drift between the model and the materialized state, per instance.
    Status(StatusArgs),

    /// Show the unified diff a synchronization would apply to one instance.
    Diff(DiffArgs),

    /// Manage the permsync background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync { command } => commands::sync::run(command),
        Commands::Status(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
