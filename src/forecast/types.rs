//! Types flowing through the forecast pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::extract::JsonObject;

/// Which pass of the pipeline an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Generation,
    Reflection,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Generation => write!(f, "generation"),
            Phase::Reflection => write!(f, "reflection"),
        }
    }
}

/// Build the request id shared by the generation and reflection passes.
pub fn request_id(run_tag: &str, storm_id: &str, lead_time_index: usize) -> String {
    format!("{run_tag}_{storm_id}_{lead_time_index}")
}

/// One prompt for one storm and one horizon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub storm_id: String,
    pub lead_time_hours: u32,
    pub rendered_prompt: String,
    pub request_id: String,
}

/// Expected shape of a parsed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// `{"lat": .., "lon": .., "wind_speed": ..}` with numeric values.
    #[default]
    ForecastPoint,
    /// `{"forecasts": [..]}`.
    ForecastList,
}

impl ResponseShape {
    pub fn validate(&self, object: &JsonObject) -> Result<(), String> {
        match self {
            ResponseShape::ForecastPoint => {
                for key in ForecastPoint::KEYS {
                    if object.get(key).and_then(|v| v.as_f64()).is_none() {
                        return Err(format!("'{key}' is missing or not a number"));
                    }
                }
                Ok(())
            }
            ResponseShape::ForecastList => match object.get("forecasts") {
                Some(v) if v.is_array() => Ok(()),
                _ => Err("'forecasts' is missing or not a list".to_string()),
            },
        }
    }
}

/// Position and intensity read from a parsed reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub lat: f64,
    pub lon: f64,
    pub wind_speed: f64,
}

impl ForecastPoint {
    pub const KEYS: [&'static str; 3] = ["lat", "lon", "wind_speed"];

    pub fn from_object(object: &JsonObject) -> Option<Self> {
        Some(Self {
            lat: object.get("lat")?.as_f64()?,
            lon: object.get("lon")?.as_f64()?,
            wind_speed: object.get("wind_speed")?.as_f64()?,
        })
    }
}

/// How a reply turned into a parsed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    /// The reply carried its own JSON object.
    Parsed,
    /// A critique reply affirmed the previous answer.
    Affirmed,
}

/// Result of a single attempt, kept for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted { acceptance: Acceptance },
    Rejected { reason: String },
    TransportFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub raw_text: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    pub retries_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub lead_time_hours: u32,
    pub model: String,
    pub phase: Phase,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<Acceptance>,
}

/// Outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub request_id: String,
    pub storm_id: String,
    /// Last reply received; empty if no reply arrived.
    pub raw_text: String,
    /// Present only when the invocation produced a usable object.
    pub parsed_object: Option<JsonObject>,
    pub metadata: ResultMetadata,
    pub attempt_log: Vec<AttemptRecord>,
    /// Why the invocation gave up, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionResult {
    pub fn is_success(&self) -> bool {
        self.parsed_object.as_ref().is_some_and(|o| !o.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetadata {
    pub lead_time_hours: u32,
    pub model: String,
    /// Attempts the generation pass needed, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_attempts: Option<u32>,
    pub final_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<Acceptance>,
}

/// A forecast fix at an absolute time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub storm_id: String,
    pub absolute_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub max_wind_speed: f64,
    pub metadata: ForecastMetadata,
}

impl Forecast {
    /// Forecast `lead_time_hours` after the latest observation `base_time`.
    pub fn at_lead_time(
        storm_id: &str,
        base_time: DateTime<Utc>,
        point: ForecastPoint,
        metadata: ForecastMetadata,
    ) -> Self {
        Self {
            storm_id: storm_id.to_string(),
            absolute_time: base_time + Duration::hours(i64::from(metadata.lead_time_hours)),
            latitude: point.lat,
            longitude: point.lon,
            max_wind_speed: point.wind_speed,
            metadata,
        }
    }
}

/// Terminal state of one storm's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StormStatus {
    /// At least one forecast was produced.
    Forecasted,
    /// The storm had no track points; the pipeline was not entered.
    NoTrackData,
    /// Every generation invocation failed; reflection was skipped.
    NoGenerationResults,
    /// Generation succeeded but no reflected forecast survived.
    NoReflectedResults,
    /// A campaign reply parsed but none of its entries was usable.
    NoUsableEntries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormReport {
    pub storm_id: String,
    pub status: StormStatus,
    pub forecasts: Vec<Forecast>,
    pub generation: Vec<CompletionResult>,
    pub reflection: Vec<CompletionResult>,
}

impl StormReport {
    pub fn empty(storm_id: &str, status: StormStatus) -> Self {
        Self {
            storm_id: storm_id.to_string(),
            status,
            forecasts: Vec::new(),
            generation: Vec::new(),
            reflection: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_tag: String,
    pub model: String,
    pub storms: BTreeMap<String, StormReport>,
}

impl RunReport {
    /// Forecasts per storm; storms without forecasts map to an empty list.
    pub fn forecasts(&self) -> BTreeMap<String, Vec<Forecast>> {
        self.storms
            .iter()
            .map(|(id, report)| (id.clone(), report.forecasts.clone()))
            .collect()
    }

    pub fn forecast_count(&self) -> usize {
        self.storms.values().map(|r| r.forecasts.len()).sum()
    }
}

/// Result of a whole run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The source reported no active storms.
    NoActiveStorms,
    Completed(RunReport),
}

impl RunOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::NoActiveStorms => None,
            RunOutcome::Completed(report) => Some(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn object(value: serde_json::Value) -> JsonObject {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_request_id_format() {
        assert_eq!(request_id("20231008T120000-1a2b3c4d", "EP152023", 3), "20231008T120000-1a2b3c4d_EP152023_3");
    }

    #[test]
    fn test_point_shape_requires_numbers() {
        let shape = ResponseShape::ForecastPoint;
        assert!(shape.validate(&object(json!({"lat": 1.0, "lon": -2, "wind_speed": 40}))).is_ok());

        let ranged = object(json!({"lat": 1.0, "lon": -2, "wind_speed": "40-50"}));
        let err = shape.validate(&ranged).unwrap_err();
        assert!(err.contains("wind_speed"));

        let missing = object(json!({"lat": 1.0, "wind_speed": 40}));
        assert!(shape.validate(&missing).unwrap_err().contains("lon"));
    }

    #[test]
    fn test_list_shape() {
        let shape = ResponseShape::ForecastList;
        assert!(shape.validate(&object(json!({"forecasts": []}))).is_ok());
        assert!(shape.validate(&object(json!({"forecasts": {}}))).is_err());
        assert!(shape.validate(&object(json!({"lat": 1}))).is_err());
    }

    #[test]
    fn test_forecast_point_from_object() {
        let point = ForecastPoint::from_object(&object(json!({"lat": 10.0, "lon": -50.0, "wind_speed": 70, "note": "x"}))).unwrap();
        assert_eq!(point, ForecastPoint { lat: 10.0, lon: -50.0, wind_speed: 70.0 });
        assert!(ForecastPoint::from_object(&object(json!({"lat": 10.0}))).is_none());
    }

    #[test]
    fn test_forecast_absolute_time_is_base_plus_lead() {
        let base = Utc.with_ymd_and_hms(2023, 8, 29, 18, 0, 0).unwrap();
        let metadata = ForecastMetadata {
            lead_time_hours: 48,
            model: "gpt-3.5-turbo".into(),
            generation_attempts: Some(1),
            final_attempts: 1,
            acceptance: Some(Acceptance::Affirmed),
        };
        let point = ForecastPoint { lat: 30.1, lon: -83.0, wind_speed: 45.0 };
        let forecast = Forecast::at_lead_time("AL102023", base, point, metadata);
        assert_eq!(forecast.absolute_time, Utc.with_ymd_and_hms(2023, 8, 31, 18, 0, 0).unwrap());
        assert_eq!(forecast.absolute_time - base, Duration::hours(48));
        assert_eq!(forecast.max_wind_speed, 45.0);
    }

    #[test]
    fn test_attempt_record_serializes_flat() {
        let record = AttemptRecord {
            attempt: 2,
            raw_text: "nope".into(),
            outcome: AttemptOutcome::Rejected { reason: "No JSON object found in response".into() },
            retries_remaining: 3,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["outcome"], "rejected");
        assert_eq!(value["retries_remaining"], 3);
        assert_eq!(value["reason"], "No JSON object found in response");
    }

    #[test]
    fn test_completion_result_success_requires_non_empty_object() {
        let mut result = CompletionResult {
            request_id: "r".into(),
            storm_id: "s".into(),
            raw_text: "{}".into(),
            parsed_object: Some(JsonObject::new()),
            metadata: ResultMetadata {
                lead_time_hours: 6,
                model: "m".into(),
                phase: Phase::Reflection,
                attempts: 1,
                acceptance: Some(Acceptance::Parsed),
            },
            attempt_log: Vec::new(),
            error: None,
        };
        assert!(!result.is_success());
        result.parsed_object = Some(object(json!({"lat": 1})));
        assert!(result.is_success());
        result.parsed_object = None;
        assert!(!result.is_success());
    }
}
