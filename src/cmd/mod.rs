//! CLI command implementations.
//!
//! | Module     | Commands handled     |
//! |------------|----------------------|
//! | `forecast` | `Run`, `Campaign`    |
//! | `prompts`  | `Prompts`            |
//! | `config`   | `Config`             |

pub mod config;
pub mod forecast;
pub mod prompts;

pub use config::cmd_config;
pub use forecast::{cmd_campaign, cmd_run};
pub use prompts::cmd_prompts;

use anyhow::{Context, Result};
use std::path::Path;

use stormcast::config::StormcastConfig;
use stormcast::storms::{FileStormSource, HttpLiveStormSource, LiveStormSource, StormTrackPoint};

use super::Cli;

/// Resolve the effective configuration: file, then environment, then flags.
pub fn load_config(cli: &Cli, working_dir: &Path) -> Result<StormcastConfig> {
    let mut config = StormcastConfig::discover(cli.config.as_deref(), working_dir)?;
    config.apply_env();

    if let Some(model) = &cli.model {
        config.service.model = model.clone();
    }
    if let Some(max_history) = cli.max_history {
        config.pipeline.max_history = max_history;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Fetch track records from `input` when given, otherwise from the live feed.
pub async fn fetch_storms(
    config: &StormcastConfig,
    input: Option<&Path>,
) -> Result<Vec<StormTrackPoint>> {
    let source: Box<dyn LiveStormSource> = match input {
        Some(path) => Box::new(FileStormSource::new(path)),
        None => Box::new(HttpLiveStormSource::new(&config.live.url)),
    };
    source.fetch().await.context("Failed to fetch live storms")
}
