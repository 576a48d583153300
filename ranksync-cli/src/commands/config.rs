//! `ranksync config`: bootstrap and inspect the YAML config.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use ranksync_core::config;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the default config if none exists.
    Init,
    /// Print the effective config.
    Show,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;
    let path = config::config_path_at(&home);

    match command {
        ConfigCommand::Init => {
            if path.exists() {
                println!("config already exists: {}", path.display());
                return Ok(());
            }
            config::load_or_init_at(&home).context("failed to write default config")?;
            println!("{} {}", "created".green(), path.display());
        }
        ConfigCommand::Show => {
            let config = config::load_at(&home)
                .context("failed to load config; run `ranksync config init` first")?;
            let yaml = serde_yaml::to_string(&config).context("failed to render config")?;
            println!("# {}", path.display());
            print!("{yaml}");
        }
    }
    Ok(())
}
