//! Prompt preview: `stormcast prompts`.

use anyhow::{Result, bail};
use std::path::Path;

use stormcast::prompts::PromptBuilder;
use stormcast::storms::group_by_storm;

use super::super::Cli;
use super::{fetch_storms, load_config};

pub async fn cmd_prompts(
    cli: &Cli,
    working_dir: &Path,
    input: Option<&Path>,
    storm: Option<&str>,
) -> Result<()> {
    let config = load_config(cli, working_dir)?;
    let points = fetch_storms(&config, input).await?;
    if points.is_empty() {
        println!("No storms currently active.");
        return Ok(());
    }

    let builder = PromptBuilder::new(&config.pipeline);
    let mut storms = group_by_storm(points);
    if let Some(id) = storm {
        storms.retain(|storm_id, _| storm_id == id);
        if storms.is_empty() {
            bail!("Storm {} not found in the track records", id);
        }
    }

    for track in storms.values() {
        for request in builder.build_forecast_prompts("preview", track)? {
            println!(
                "=== {} +{}h ({}) ===",
                request.storm_id, request.lead_time_hours, request.request_id
            );
            println!("{}", request.rendered_prompt);
        }
    }
    Ok(())
}
