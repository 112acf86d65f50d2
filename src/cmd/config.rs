//! Configuration view and validation commands: `stormcast config`.

use anyhow::{Context, Result, bail};
use std::path::Path;

use stormcast::config::{CONFIG_FILE, StormcastConfig};

use super::super::{Cli, ConfigCommands};
use super::load_config;

pub fn cmd_config(cli: &Cli, working_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = load_config(cli, working_dir)?;
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
        }
        Some(ConfigCommands::Validate) => {
            load_config(cli, working_dir)?;
            println!("Configuration is valid.");
        }
        Some(ConfigCommands::Init) => {
            let path = working_dir.join(CONFIG_FILE);
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            let rendered = toml::to_string_pretty(&StormcastConfig::default())
                .context("Failed to render default configuration")?;
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Created {}", path.display());
        }
    }
    Ok(())
}
