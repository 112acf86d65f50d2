//! Structured output extraction from free-form model replies.
//!
//! Replies usually wrap the JSON answer in commentary. Extraction takes the
//! span from the first `{` to the last `}`; it assumes at most one object per
//! reply, so several objects or stray braces yield an unparsable span, which
//! the caller treats as a retryable failure rather than a crash.

use serde_json::{Map, Value};

use crate::errors::ForecastError;
use crate::forecast::types::Phase;

/// A parsed JSON object.
pub type JsonObject = Map<String, Value>;

/// What the retry loop should do with a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractOutcome {
    /// The reply carried a JSON object.
    Parsed(JsonObject),
    /// The reply could not be used; try again.
    NeedsRetry(String),
    /// A critique reply that affirms the previous answer instead of
    /// restating it. Carries the previous answer.
    ImplicitAccept(JsonObject),
}

/// Return the substring from the first `{` to the last `}` inclusive.
pub fn extract_json(text: &str) -> Result<&str, ForecastError> {
    let start = text.find('{').ok_or(ForecastError::Extraction)?;
    let end = text.rfind('}').ok_or(ForecastError::Extraction)?;
    if end < start {
        return Err(ForecastError::Extraction);
    }
    Ok(&text[start..=end])
}

/// Parse an extracted span into a JSON object.
pub fn parse(json: &str) -> Result<JsonObject, ForecastError> {
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ForecastError::parse(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(ForecastError::parse(e.to_string())),
    }
}

/// Extract and parse in one step.
pub fn extract_object(text: &str) -> Result<JsonObject, ForecastError> {
    parse(extract_json(text)?)
}

/// Whether a reply opens with an affirmative "true", ignoring leading
/// whitespace and markdown emphasis or quotes.
pub fn is_affirmation(text: &str) -> bool {
    let trimmed = text.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '*' | '`'));
    trimmed
        .get(..4)
        .is_some_and(|head| head.eq_ignore_ascii_case("true"))
}

/// Classify a reply for the retry loop.
///
/// `prior_reply` is the last assistant message of the conversation, if any.
/// It is only consulted for a reflection reply that fails to parse but opens
/// with "true".
pub fn classify(text: &str, phase: Phase, prior_reply: Option<&str>) -> ExtractOutcome {
    let err = match extract_object(text) {
        Ok(object) => return ExtractOutcome::Parsed(object),
        Err(err) => err,
    };

    if phase == Phase::Reflection && is_affirmation(text) {
        return match prior_reply.map(extract_object) {
            Some(Ok(prior)) => ExtractOutcome::ImplicitAccept(prior),
            Some(Err(prior_err)) => ExtractOutcome::NeedsRetry(format!(
                "affirmation refers to an unparsable answer: {prior_err}"
            )),
            None => ExtractOutcome::NeedsRetry(
                "affirmation without a previous answer".to_string(),
            ),
        };
    }

    ExtractOutcome::NeedsRetry(err.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_plain() {
        let text = r#"{"lat": 15.2}"#;
        assert_eq!(extract_json(text).unwrap(), text);
    }

    #[test]
    fn test_extract_json_ignores_prose_of_any_length() {
        let object = r#"{"lat": 15.2, "lon": -45.1, "wind_speed": 65}"#;
        for (prefix, suffix) in [
            ("", ""),
            ("Sure! ", ""),
            ("", " Let me know if you need more."),
            (
                "Based on similar storms in late August the track should curve north.\n\n",
                "\n\nThis is not an official forecast.",
            ),
        ] {
            let text = format!("{prefix}{object}{suffix}");
            assert_eq!(extract_json(&text).unwrap(), object);
        }
    }

    #[test]
    fn test_extract_json_keeps_nested_object() {
        let text = r#"Answer: {"point": {"lat": 1}} done"#;
        assert_eq!(extract_json(text).unwrap(), r#"{"point": {"lat": 1}}"#);
    }

    #[test]
    fn test_extract_json_no_braces() {
        assert!(matches!(
            extract_json("True"),
            Err(ForecastError::Extraction)
        ));
    }

    #[test]
    fn test_extract_json_reversed_braces() {
        assert!(matches!(
            extract_json("} nothing here {"),
            Err(ForecastError::Extraction)
        ));
    }

    #[test]
    fn test_two_objects_are_unparsable() {
        let text = r#"{"lat": 1} or maybe {"lat": 2}"#;
        let span = extract_json(text).unwrap();
        assert!(matches!(parse(span), Err(ForecastError::Parse { .. })));
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = parse(r#"{"lat": 15-17}"#).unwrap_err();
        assert!(matches!(err, ForecastError::Parse { .. }));
    }

    #[test]
    fn test_round_trip_through_prose() {
        let original = json!({
            "lat": 21.5,
            "lon": -71.25,
            "wind_speed": 90,
            "basin": "AL",
            "rapid_intensification": false,
        });
        let text = format!(
            "Here is my forecast:\n{}\nThe storm should weaken after landfall.",
            serde_json::to_string_pretty(&original).unwrap()
        );
        let parsed = extract_object(&text).unwrap();
        assert_eq!(Value::Object(parsed), original);
    }

    #[test]
    fn test_is_affirmation_variants() {
        assert!(is_affirmation("True"));
        assert!(is_affirmation("true, the forecast is consistent"));
        assert!(is_affirmation("  **TRUE**"));
        assert!(is_affirmation("\"True\""));
        assert!(!is_affirmation("False. Here is a correction"));
        assert!(!is_affirmation("It is true"));
        assert!(!is_affirmation("tru"));
    }

    #[test]
    fn test_classify_generation_parsed() {
        let outcome = classify(r#"{"lat": 10.0}"#, Phase::Generation, None);
        assert_eq!(
            outcome,
            ExtractOutcome::Parsed(json!({"lat": 10.0}).as_object().unwrap().clone())
        );
    }

    #[test]
    fn test_classify_generation_affirmation_needs_retry() {
        let prior = r#"{"lat": 10.0}"#;
        let outcome = classify("True", Phase::Generation, Some(prior));
        assert!(matches!(outcome, ExtractOutcome::NeedsRetry(_)));
    }

    #[test]
    fn test_classify_reflection_affirmation_accepts_prior() {
        let prior = r#"Forecast: {"lat":10.0,"lon":-50.0,"wind_speed":70}"#;
        let outcome = classify("True, looks consistent.", Phase::Reflection, Some(prior));
        let expected = json!({"lat": 10.0, "lon": -50.0, "wind_speed": 70});
        assert_eq!(
            outcome,
            ExtractOutcome::ImplicitAccept(expected.as_object().unwrap().clone())
        );
    }

    #[test]
    fn test_classify_reflection_correction_wins_over_affirmation() {
        let prior = r#"{"lat": 10.0}"#;
        let outcome = classify(r#"True. {"lat": 11.0}"#, Phase::Reflection, Some(prior));
        assert_eq!(
            outcome,
            ExtractOutcome::Parsed(json!({"lat": 11.0}).as_object().unwrap().clone())
        );
    }

    #[test]
    fn test_classify_reflection_affirmation_without_prior() {
        let outcome = classify("True", Phase::Reflection, None);
        assert!(matches!(outcome, ExtractOutcome::NeedsRetry(_)));
    }

    #[test]
    fn test_classify_reflection_rejection_without_json() {
        let outcome = classify("False, the 48 hour forecast drifts too far east.", Phase::Reflection, Some("{}"));
        assert!(matches!(outcome, ExtractOutcome::NeedsRetry(_)));
    }
}
