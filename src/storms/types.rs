//! Storm track records.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Wind speeds at or below this value are archive "missing" sentinels
/// (the best-track files use `-999`).
pub const MISSING_WIND_SENTINEL: f64 = -99.0;

/// One observed fix of a storm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormTrackPoint {
    #[serde(alias = "id")]
    pub storm_id: String,
    #[serde(alias = "time", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
    /// Maximum sustained wind in knots; `None` when missing.
    #[serde(
        alias = "wind_speed",
        default,
        deserialize_with = "deserialize_wind_speed"
    )]
    pub max_wind_speed: Option<f64>,
}

impl StormTrackPoint {
    pub fn new(
        storm_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        max_wind_speed: Option<f64>,
    ) -> Self {
        Self {
            storm_id: storm_id.into(),
            timestamp,
            latitude,
            longitude,
            max_wind_speed,
        }
    }
}

/// A feed row as received. Position fields may be `null` or absent.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackRecord {
    #[serde(alias = "id")]
    pub storm_id: String,
    #[serde(alias = "time", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "lat", default)]
    pub latitude: Option<f64>,
    #[serde(alias = "lon", default)]
    pub longitude: Option<f64>,
    #[serde(
        alias = "wind_speed",
        default,
        deserialize_with = "deserialize_wind_speed"
    )]
    pub max_wind_speed: Option<f64>,
}

impl TrackRecord {
    /// The observed fix, or `None` when the row has no position.
    pub fn into_point(self) -> Option<StormTrackPoint> {
        Some(StormTrackPoint {
            latitude: self.latitude?,
            longitude: self.longitude?,
            storm_id: self.storm_id,
            timestamp: self.timestamp,
            max_wind_speed: self.max_wind_speed,
        })
    }
}

/// Parse the timestamp formats the feeds emit. Naive times are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{raw}'")))
}

fn deserialize_wind_speed<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| *v > MISSING_WIND_SENTINEL))
}

/// Group points by storm, each track sorted newest first.
pub fn group_by_storm(points: Vec<StormTrackPoint>) -> BTreeMap<String, Vec<StormTrackPoint>> {
    let mut storms: BTreeMap<String, Vec<StormTrackPoint>> = BTreeMap::new();
    for point in points {
        storms.entry(point.storm_id.clone()).or_default().push(point);
    }
    for track in storms.values_mut() {
        sort_newest_first(track);
    }
    storms
}

pub fn sort_newest_first(track: &mut [StormTrackPoint]) {
    track.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Time of the most recent observation.
pub fn latest_observation(track: &[StormTrackPoint]) -> Option<DateTime<Utc>> {
    track.iter().map(|p| p.timestamp).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deserialize_live_feed_record() {
        let json = r#"{
            "id": "AL092023",
            "time": "2023-08-29T18:00:00",
            "lat": 24.3,
            "lon": -84.9,
            "wind_speed": 85,
            "wind_speed_mph": 98,
            "wind_speed_kph": 157
        }"#;
        let point: StormTrackPoint = serde_json::from_str(json).unwrap();
        assert_eq!(point.storm_id, "AL092023");
        assert_eq!(point.timestamp, Utc.with_ymd_and_hms(2023, 8, 29, 18, 0, 0).unwrap());
        assert_eq!(point.latitude, 24.3);
        assert_eq!(point.longitude, -84.9);
        assert_eq!(point.max_wind_speed, Some(85.0));
    }

    #[test]
    fn test_missing_wind_conventions() {
        let null_wind = r#"{"id":"X","time":"2023-01-01 00:00:00","lat":1,"lon":2,"wind_speed":null}"#;
        let sentinel = r#"{"id":"X","time":"2023-01-01 00:00:00","lat":1,"lon":2,"wind_speed":-999}"#;
        let absent = r#"{"id":"X","time":"2023-01-01 00:00:00","lat":1,"lon":2}"#;
        for json in [null_wind, sentinel, absent] {
            let point: StormTrackPoint = serde_json::from_str(json).unwrap();
            assert_eq!(point.max_wind_speed, None, "{json}");
        }
    }

    #[test]
    fn test_record_without_position_has_no_point() {
        let json = r#"{"id":"X","time":"2023-01-01 00:00:00","lat":null,"lon":2,"wind_speed":30}"#;
        let record: TrackRecord = serde_json::from_str(json).unwrap();
        assert!(record.into_point().is_none());

        let json = r#"{"id":"X","time":"2023-01-01 00:00:00","lat":1.5}"#;
        let record: TrackRecord = serde_json::from_str(json).unwrap();
        assert!(record.into_point().is_none());

        let json = r#"{"id":"X","time":"2023-01-01 00:00:00","lat":1.5,"lon":-2.5,"wind_speed":-99}"#;
        let point = serde_json::from_str::<TrackRecord>(json).unwrap().into_point().unwrap();
        assert_eq!((point.latitude, point.longitude, point.max_wind_speed), (1.5, -2.5, None));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let json = r#"{"id":"X","time":"yesterday","lat":1,"lon":2,"wind_speed":30}"#;
        let err = serde_json::from_str::<StormTrackPoint>(json).unwrap_err();
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2023, 9, 1, 6, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2023-09-01T06:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2023-09-01T08:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-09-01 06:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-09-01T06:00"), Some(expected));
        assert_eq!(parse_timestamp("09/01/2023"), None);
    }

    #[test]
    fn test_group_by_storm_sorts_newest_first() {
        let t = |h| Utc.with_ymd_and_hms(2023, 8, 30, h, 0, 0).unwrap();
        let points = vec![
            StormTrackPoint::new("B", t(0), 10.0, -40.0, Some(35.0)),
            StormTrackPoint::new("A", t(0), 20.0, -80.0, Some(50.0)),
            StormTrackPoint::new("A", t(12), 21.0, -81.0, Some(60.0)),
            StormTrackPoint::new("A", t(6), 20.5, -80.5, Some(55.0)),
        ];
        let grouped = group_by_storm(points);
        assert_eq!(grouped.len(), 2);
        let times: Vec<_> = grouped["A"].iter().map(|p| p.timestamp).collect();
        assert_eq!(times, vec![t(12), t(6), t(0)]);
        assert_eq!(latest_observation(&grouped["A"]), Some(t(12)));
    }

    #[test]
    fn test_latest_observation_empty() {
        assert_eq!(latest_observation(&[]), None);
    }
}
