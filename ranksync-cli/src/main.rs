//! ranksync: keep host group membership and the rank table in step.
//!
//! # Usage
//!
//! ```text
//! ranksync config init|show
//! ranksync daemon start|stop|status
//! ranksync join <user>
//! ranksync leave <user>
//! ranksync grant <user> <group>
//! ranksync revoke <user> <group>
//! ranksync groups <user>
//! ranksync record <user> [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ranksync_daemon::RequestKind;

use commands::{
    config::ConfigCommand,
    daemon::DaemonCommand,
    event::{GroupArgs, UserArgs},
    record::RecordArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ranksync",
    version,
    about = "Persist and restore user groups against a rank table",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or inspect ~/.ranksync/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Run or talk to the background host daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Connect a user and bootstrap their groups.
    Join(UserArgs),

    /// Disconnect a user.
    Leave(UserArgs),

    /// Add a user to a group and persist the change.
    Grant(GroupArgs),

    /// Remove a user from a group and persist the change.
    Revoke(GroupArgs),

    /// Show a user's live groups.
    Groups(UserArgs),

    /// Print the stored record for a user, read straight from the database.
    Record(RecordArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Config { command } => commands::config::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Join(args) => args.run(RequestKind::Join),
        Commands::Leave(args) => args.run(RequestKind::Leave),
        Commands::Grant(args) => args.run(RequestKind::Grant),
        Commands::Revoke(args) => args.run(RequestKind::Revoke),
        Commands::Groups(args) => args.run(RequestKind::Groups),
        Commands::Record(args) => args.run(),
    }
}
