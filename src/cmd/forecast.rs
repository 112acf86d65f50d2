//! Forecast runs: `stormcast run` and `stormcast campaign`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use stormcast::forecast::{ForecastOrchestrator, RunOutcome};
use stormcast::llm::OpenAiClient;

use super::super::Cli;
use super::{fetch_storms, load_config};

const NO_ACTIVE_STORMS: &str = "No storms currently active.";

#[derive(Debug, Clone, Copy)]
enum Mode {
    Reflection,
    Campaign,
}

pub async fn cmd_run(
    cli: &Cli,
    working_dir: &Path,
    input: Option<&Path>,
    full_report: bool,
) -> Result<()> {
    forecast(cli, working_dir, input, full_report, Mode::Reflection).await
}

pub async fn cmd_campaign(
    cli: &Cli,
    working_dir: &Path,
    input: Option<&Path>,
    full_report: bool,
) -> Result<()> {
    forecast(cli, working_dir, input, full_report, Mode::Campaign).await
}

async fn forecast(
    cli: &Cli,
    working_dir: &Path,
    input: Option<&Path>,
    full_report: bool,
    mode: Mode,
) -> Result<()> {
    let config = load_config(cli, working_dir)?;
    let points = fetch_storms(&config, input).await?;

    // Nothing to forecast, so no key is needed.
    if points.is_empty() {
        println!("{NO_ACTIVE_STORMS}");
        return Ok(());
    }

    let client = OpenAiClient::from_env(&config.service)
        .context("Cannot create the completion client")?;
    tracing::debug!(endpoint = client.endpoint(), ?mode, "Completion client ready");

    let orchestrator = ForecastOrchestrator::new(Arc::new(client), &config);
    let model = config.service.model.as_str();
    let outcome = match mode {
        Mode::Reflection => orchestrator.run(points, model).await,
        Mode::Campaign => orchestrator.run_campaign(points, model).await,
    };

    match outcome {
        RunOutcome::NoActiveStorms => println!("{NO_ACTIVE_STORMS}"),
        RunOutcome::Completed(report) => {
            let rendered = if full_report {
                serde_json::to_string_pretty(&report)
            } else {
                serde_json::to_string_pretty(&report.forecasts())
            }
            .context("Failed to render forecasts")?;
            println!("{rendered}");
        }
    }
    Ok(())
}
