//! Prompt templates for the forecast pipeline.
//!
//! ## Prompt Types
//!
//! - **Forecast prompt**: one per lead time, embeds the capped track history
//! - **Reflection prompt**: one per lead time, embeds the aggregated forecast
//!   table so the model can cross-check its horizons
//! - **Campaign prompt**: one per storm, asks for every horizon at once
//!
//! Building prompts is pure text construction.

use serde::Serialize;
use serde_json::Value;

use crate::config::PipelineSection;
use crate::errors::ForecastError;
use crate::extract::JsonObject;
use crate::forecast::types::{ForecastRequest, request_id};
use crate::storms::types::{StormTrackPoint, sort_newest_first};

/// System message seeding every forecast conversation.
pub const FORECASTER_SYSTEM_PROMPT: &str = "Please act as a weather forecaster and a helpful assistant. \
Data provided are real time and from official sources including NOAA.";

/// System message for the single-shot campaign.
pub const CAMPAIGN_SYSTEM_PROMPT: &str = "Please act as a forecaster and a helpful assistant. \
Responses should be based on historical data and forecasts must be as accurate as possible.";

/// Horizons requested by the single-shot campaign prompt.
pub const CAMPAIGN_LEAD_TIMES: [u32; 5] = [12, 24, 36, 48, 72];

/// One row of the history table embedded in prompts.
#[derive(Debug, Serialize)]
struct HistoryRow {
    time: String,
    lat: f64,
    lon: f64,
    wind_speed: Option<f64>,
}

/// Builds forecast, reflection and campaign prompts.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    lead_times: Vec<u32>,
    max_history: usize,
}

impl PromptBuilder {
    pub fn new(pipeline: &PipelineSection) -> Self {
        Self {
            lead_times: pipeline.lead_times.clone(),
            max_history: pipeline.max_history.max(1),
        }
    }

    /// One forecast request per lead time, in lead-time order.
    ///
    /// The request at index `i` gets request id `{run_tag}_{storm_id}_{i}`.
    pub fn build_forecast_prompts(
        &self,
        run_tag: &str,
        track: &[StormTrackPoint],
    ) -> Result<Vec<ForecastRequest>, ForecastError> {
        let storm_id = storm_id_of(track)?;
        let table = self.render_history(track);

        Ok(self
            .lead_times
            .iter()
            .enumerate()
            .map(|(index, &hours)| ForecastRequest {
                storm_id: storm_id.to_string(),
                lead_time_hours: hours,
                rendered_prompt: forecast_prompt(storm_id, hours, &table),
                request_id: request_id(run_tag, storm_id, index),
            })
            .collect())
    }

    /// Critique prompt for one lead time against the aggregated table.
    pub fn build_reflection_prompt(&self, lead_time_hours: u32, aggregated_forecast: &str) -> String {
        format!(
            r#"Please quality check the response. The requirements are:
- The responses are numbers and not ranges.
- They align with the forecasts for the other forecast hours.

This is an aggregated forecast produced by you and included for reference:
{aggregated_forecast}

Respond with either "True" or "False" based on the quality check. If it is "False", provide a more accurate forecast for the original {lead_time_hours} hours in the future as exactly one JSON object with the numeric attributes "lat", "lon" and "wind_speed". This check is requested every time, so it is possible that the original response is accurate.
"#
        )
    }

    /// Single-shot prompt asking for every campaign horizon at once.
    pub fn build_campaign_prompt(&self, track: &[StormTrackPoint]) -> Result<String, ForecastError> {
        let storm_id = storm_id_of(track)?;
        let table = self.render_history(track);
        let hours = CAMPAIGN_LEAD_TIMES
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Ok(format!(
            r#"I want you to act like a forecaster who gives a general idea of the future of the storm even though it will not be an official forecast.
Please provide forecasts for {hours} hours in the future from the most recent time in Figure 1.
The response will be JSON formatted with "forecasts" as the only key. The value of the key is a list of forecast objects.
Each forecast object has five attributes:
    "id" which identifies the storm
    "time" which is the predicted time in ISO 8601 format
    "lat" which is the predicted latitude in decimal degrees
    "lon" which is the predicted longitude in decimal degrees
    "wind_speed" which is the predicted maximum sustained wind speed in knots.
The response must be in JSON format, and the JSON characters must be at the beginning of the response.
If you wish to add additional comments, they must come after the JSON data. Avoid these common mistakes:
- Responding with some variation of the track input.
- Not responding in the requested time steps.

Figure 1. The historical records for storm {storm_id}.
- wind_speed is the maximum sustained wind speed in knots (null when unknown).
- lat and lon are the geographic coordinates in decimal degrees.
- Records are sorted by time, most recent first.

{table}
"#
        ))
    }

    /// The capped history window as pretty JSON records, newest first.
    pub fn render_history(&self, track: &[StormTrackPoint]) -> String {
        let mut window = track.to_vec();
        sort_newest_first(&mut window);
        let rows: Vec<HistoryRow> = window
            .iter()
            .take(self.max_history)
            .map(|p| HistoryRow {
                time: p.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                lat: p.latitude,
                lon: p.longitude,
                wind_speed: p.max_wind_speed,
            })
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }
}

fn forecast_prompt(storm_id: &str, hours: u32, table: &str) -> String {
    format!(
        r#"Please provide a forecast for {hours} hours in the future from the most recent time of storm {storm_id}.
This forecast should be based on historical knowledge which includes but is not limited to storms with similar tracks and intensities, the time of year of the storm, the geographical coordinates, and climate change that may have occurred since your training.
The response will be exactly one JSON object with these attributes:
    "lat" which is the predicted latitude in decimal degrees.
    "lon" which is the predicted longitude in decimal degrees.
    "wind_speed" which is the predicted maximum sustained wind speed in knots.
Each value must be a single number, not a range.

Table 1. The historical records for the storm.
- wind_speed is the maximum sustained wind speed in knots (null when unknown).
- lat and lon are the geographic coordinates in decimal degrees.
- Records are sorted by time, most recent first.
{table}
"#
    )
}

fn storm_id_of(track: &[StormTrackPoint]) -> Result<&str, ForecastError> {
    track
        .first()
        .map(|p| p.storm_id.as_str())
        .ok_or_else(|| ForecastError::EmptyInput {
            subject: "storm track".to_string(),
        })
}

/// Aggregate successful generation objects into the table shown to the
/// reflection pass. Each object gains a `forecast_hour` field; rows are in
/// lead-time order.
pub fn aggregate_forecasts(entries: &[(u32, JsonObject)]) -> String {
    let mut rows: Vec<(u32, JsonObject)> = entries.to_vec();
    rows.sort_by_key(|(hours, _)| *hours);
    let rows: Vec<Value> = rows
        .into_iter()
        .map(|(hours, mut object)| {
            object.insert("forecast_hour".to_string(), Value::from(hours));
            Value::Object(object)
        })
        .collect();
    serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
}
