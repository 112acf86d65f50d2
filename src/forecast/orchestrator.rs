//! Forecast orchestrator.
//!
//! Drives the two-pass pipeline for every live storm:
//! 1. Build one generation request per lead time and invoke them in parallel
//! 2. Wait for all of them, then aggregate the successful answers
//! 3. Build one reflection request per answered lead time against that
//!    aggregate and invoke them in parallel on the same conversations
//! 4. Turn each accepted reflection into a timestamped forecast
//!
//! Storms are independent and run concurrently. A lead time that exhausts
//! its budget is simply absent from the output.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::{PipelineSection, StormcastConfig};
use crate::errors::ForecastError;
use crate::extract::JsonObject;
use crate::forecast::invoker::RetryingInvoker;
use crate::forecast::types::{
    CompletionResult, Forecast, ForecastMetadata, ForecastPoint, ForecastRequest, Phase,
    ResponseShape, RunOutcome, RunReport, StormReport, StormStatus, request_id,
};
use crate::llm::{CompletionClient, ConversationStore};
use crate::prompts::{CAMPAIGN_LEAD_TIMES, CAMPAIGN_SYSTEM_PROMPT, PromptBuilder, aggregate_forecasts};
use crate::storms::types::{StormTrackPoint, group_by_storm, latest_observation, parse_timestamp};
use crate::storms::LiveStormSource;

/// Unique tag namespacing the request ids of one run.
pub fn new_run_tag() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), &suffix[..8])
}

pub struct ForecastOrchestrator {
    client: Arc<dyn CompletionClient>,
    prompts: PromptBuilder,
    pipeline: PipelineSection,
}

impl ForecastOrchestrator {
    pub fn new(client: Arc<dyn CompletionClient>, config: &StormcastConfig) -> Self {
        Self {
            client,
            prompts: PromptBuilder::new(&config.pipeline),
            pipeline: config.pipeline.clone(),
        }
    }

    /// Fetch the live storms from `source` and run the reflection pipeline.
    pub async fn run_from_source(
        &self,
        source: &dyn LiveStormSource,
        model: &str,
    ) -> Result<RunOutcome, ForecastError> {
        let points = source.fetch().await?;
        Ok(self.run(points, model).await)
    }

    /// Run the generate → reflect pipeline for every storm in `live`.
    pub async fn run(&self, live: Vec<StormTrackPoint>, model: &str) -> RunOutcome {
        if live.is_empty() {
            tracing::info!("No storms currently active");
            return RunOutcome::NoActiveStorms;
        }

        let run_tag = new_run_tag();
        let store = Arc::new(ConversationStore::new());
        let invoker = Arc::new(RetryingInvoker::new(Arc::clone(&self.client), store, model));
        let storms = group_by_storm(live);

        tracing::info!(%run_tag, storms = storms.len(), %model, "Starting forecast run");

        let reports = join_all(
            storms
                .iter()
                .map(|(storm_id, track)| self.forecast_with(&invoker, &run_tag, storm_id, track)),
        )
        .await;

        let report = RunReport {
            run_tag,
            model: model.to_string(),
            storms: reports.into_iter().map(|r| (r.storm_id.clone(), r)).collect(),
        };
        tracing::info!(
            run_tag = %report.run_tag,
            forecasts = report.forecast_count(),
            "Forecast run complete"
        );
        RunOutcome::Completed(report)
    }

    /// Forecast a single storm with its own conversation store.
    pub async fn forecast_storm(
        &self,
        run_tag: &str,
        track: &[StormTrackPoint],
        model: &str,
    ) -> StormReport {
        let store = Arc::new(ConversationStore::new());
        let invoker = Arc::new(RetryingInvoker::new(Arc::clone(&self.client), store, model));
        let storm_id = track.first().map(|p| p.storm_id.clone()).unwrap_or_default();
        self.forecast_with(&invoker, run_tag, &storm_id, track).await
    }

    async fn forecast_with(
        &self,
        invoker: &Arc<RetryingInvoker>,
        run_tag: &str,
        storm_id: &str,
        track: &[StormTrackPoint],
    ) -> StormReport {
        let Some(base_time) = latest_observation(track) else {
            tracing::info!(%storm_id, "Storm has no track points; skipping");
            return StormReport::empty(storm_id, StormStatus::NoTrackData);
        };
        let requests = match self.prompts.build_forecast_prompts(run_tag, track) {
            Ok(requests) => requests,
            Err(e) => {
                tracing::info!(%storm_id, error = %e, "Storm has no usable track; skipping");
                return StormReport::empty(storm_id, StormStatus::NoTrackData);
            }
        };

        tracing::info!(%storm_id, prompts = requests.len(), "Generating forecasts");
        let generation = self
            .fan_out(
                invoker,
                requests.clone(),
                Phase::Generation,
                self.pipeline.generation_retries,
            )
            .await;

        let answered: Vec<(u32, JsonObject)> = generation
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| {
                r.parsed_object
                    .clone()
                    .map(|object| (r.metadata.lead_time_hours, object))
            })
            .collect();

        if answered.is_empty() {
            tracing::warn!(%storm_id, "No generation succeeded; skipping reflection");
            return StormReport {
                generation,
                ..StormReport::empty(storm_id, StormStatus::NoGenerationResults)
            };
        }

        let aggregate = aggregate_forecasts(&answered);
        // Exhausted lead times have no answer to critique and stay out of
        // the output.
        let answered_ids: HashSet<&str> = generation
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.request_id.as_str())
            .collect();
        let reflection_requests: Vec<ForecastRequest> = requests
            .iter()
            .filter(|request| answered_ids.contains(request.request_id.as_str()))
            .map(|request| ForecastRequest {
                rendered_prompt: self
                    .prompts
                    .build_reflection_prompt(request.lead_time_hours, &aggregate),
                ..request.clone()
            })
            .collect();

        tracing::info!(
            %storm_id,
            answered = answered.len(),
            prompts = reflection_requests.len(),
            "Reflecting on forecasts"
        );
        let reflection = self
            .fan_out(
                invoker,
                reflection_requests,
                Phase::Reflection,
                self.pipeline.reflection_retries,
            )
            .await;

        let forecasts = merge_reflections(storm_id, base_time, &generation, &reflection);
        let status = if forecasts.is_empty() {
            StormStatus::NoReflectedResults
        } else {
            StormStatus::Forecasted
        };
        tracing::info!(%storm_id, forecasts = forecasts.len(), ?status, "Storm complete");

        StormReport {
            storm_id: storm_id.to_string(),
            status,
            forecasts,
            generation,
            reflection,
        }
    }

    /// Single-shot campaign: one multi-horizon prompt per storm, no
    /// reflection pass.
    pub async fn run_campaign(&self, live: Vec<StormTrackPoint>, model: &str) -> RunOutcome {
        if live.is_empty() {
            tracing::info!("No storms currently active");
            return RunOutcome::NoActiveStorms;
        }

        let run_tag = new_run_tag();
        let store = Arc::new(ConversationStore::new());
        let invoker = Arc::new(
            RetryingInvoker::new(Arc::clone(&self.client), store, model)
                .with_system_prompt(CAMPAIGN_SYSTEM_PROMPT)
                .with_shape(ResponseShape::ForecastList),
        );
        let storms = group_by_storm(live);
        let horizon = CAMPAIGN_LEAD_TIMES.iter().copied().max().unwrap_or_default();

        let mut requests = Vec::new();
        for (storm_id, track) in &storms {
            match self.prompts.build_campaign_prompt(track) {
                Ok(prompt) => requests.push(ForecastRequest {
                    storm_id: storm_id.clone(),
                    lead_time_hours: horizon,
                    rendered_prompt: prompt,
                    request_id: request_id(&run_tag, storm_id, 0),
                }),
                Err(e) => tracing::info!(%storm_id, error = %e, "Skipping storm"),
            }
        }

        tracing::info!(%run_tag, storms = requests.len(), %model, "Starting campaign run");
        let results = self
            .fan_out(
                &invoker,
                requests,
                Phase::Generation,
                self.pipeline.campaign_retries,
            )
            .await;
        let mut by_storm: HashMap<String, CompletionResult> = results
            .into_iter()
            .map(|r| (r.storm_id.clone(), r))
            .collect();

        let mut reports = BTreeMap::new();
        for (storm_id, track) in &storms {
            let Some(base_time) = latest_observation(track) else {
                reports.insert(storm_id.clone(), StormReport::empty(storm_id, StormStatus::NoTrackData));
                continue;
            };
            let Some(result) = by_storm.remove(storm_id) else {
                reports.insert(
                    storm_id.clone(),
                    StormReport::empty(storm_id, StormStatus::NoGenerationResults),
                );
                continue;
            };

            let forecasts = campaign_forecasts(storm_id, base_time, &result);
            let status = if !result.is_success() {
                StormStatus::NoGenerationResults
            } else if forecasts.is_empty() {
                StormStatus::NoUsableEntries
            } else {
                StormStatus::Forecasted
            };
            reports.insert(
                storm_id.clone(),
                StormReport {
                    storm_id: storm_id.clone(),
                    status,
                    forecasts,
                    generation: vec![result],
                    reflection: Vec::new(),
                },
            );
        }

        RunOutcome::Completed(RunReport {
            run_tag,
            model: model.to_string(),
            storms: reports,
        })
    }

    /// Invoke every request on a bounded pool and wait for all of them.
    ///
    /// Results come back in lead-time order regardless of completion order.
    async fn fan_out(
        &self,
        invoker: &Arc<RetryingInvoker>,
        requests: Vec<ForecastRequest>,
        phase: Phase,
        max_retries: u32,
    ) -> Vec<CompletionResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        let permits = self
            .pipeline
            .max_concurrency
            .unwrap_or(requests.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks = JoinSet::new();

        for request in requests {
            let invoker = Arc::clone(invoker);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await; // Hold until complete
                invoker.invoke(&request, phase, max_retries).await
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(%phase, error = %e, "Invocation task aborted"),
            }
        }
        results.sort_by(|a, b| {
            a.metadata
                .lead_time_hours
                .cmp(&b.metadata.lead_time_hours)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        results
    }
}

/// Turn accepted reflections into forecasts at `base_time + lead time`.
fn merge_reflections(
    storm_id: &str,
    base_time: DateTime<Utc>,
    generation: &[CompletionResult],
    reflection: &[CompletionResult],
) -> Vec<Forecast> {
    let generation_attempts: HashMap<&str, u32> = generation
        .iter()
        .map(|r| (r.request_id.as_str(), r.metadata.attempts))
        .collect();

    reflection
        .iter()
        .filter(|r| r.is_success())
        .filter_map(|r| {
            let object = r.parsed_object.as_ref()?;
            let Some(point) = ForecastPoint::from_object(object) else {
                tracing::warn!(request_id = %r.request_id, "Reflected answer lacks numeric fields; dropping");
                return None;
            };
            let metadata = ForecastMetadata {
                lead_time_hours: r.metadata.lead_time_hours,
                model: r.metadata.model.clone(),
                generation_attempts: generation_attempts.get(r.request_id.as_str()).copied(),
                final_attempts: r.metadata.attempts,
                acceptance: r.metadata.acceptance,
            };
            Some(Forecast::at_lead_time(storm_id, base_time, point, metadata))
        })
        .collect()
}

/// Read the `forecasts` list of a campaign reply. Entries without a
/// parseable time or numeric fields, or timed before the latest
/// observation, are dropped.
fn campaign_forecasts(
    storm_id: &str,
    base_time: DateTime<Utc>,
    result: &CompletionResult,
) -> Vec<Forecast> {
    let Some(entries) = result
        .parsed_object
        .as_ref()
        .and_then(|o| o.get("forecasts"))
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };

    let mut forecasts: Vec<Forecast> = entries
        .iter()
        .filter_map(|entry| {
            let object = entry.as_object()?;
            let time = object.get("time").and_then(|t| t.as_str()).and_then(parse_timestamp);
            let point = ForecastPoint::from_object(object);
            let (Some(time), Some(point)) = (time, point) else {
                tracing::warn!(%storm_id, %entry, "Dropping malformed campaign entry");
                return None;
            };
            let hours = (time - base_time).num_hours();
            let Ok(lead_time_hours) = u32::try_from(hours) else {
                tracing::warn!(%storm_id, %time, "Dropping campaign entry before latest observation");
                return None;
            };
            Some(Forecast {
                storm_id: storm_id.to_string(),
                absolute_time: time,
                latitude: point.lat,
                longitude: point.lon,
                max_wind_speed: point.wind_speed,
                metadata: ForecastMetadata {
                    lead_time_hours,
                    model: result.metadata.model.clone(),
                    generation_attempts: Some(result.metadata.attempts),
                    final_attempts: result.metadata.attempts,
                    acceptance: result.metadata.acceptance,
                },
            })
        })
        .collect();
    forecasts.sort_by_key(|f| f.absolute_time);
    forecasts
}
