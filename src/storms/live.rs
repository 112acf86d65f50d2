//! Sources of current storm tracks.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::errors::ForecastError;
use crate::storms::types::{StormTrackPoint, TrackRecord};

/// Something that can report the currently active storms.
///
/// An empty result is a valid answer: no storms are active.
#[async_trait]
pub trait LiveStormSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<StormTrackPoint>, ForecastError>;
}

/// The live HTTP feed (`GET {base}live-storms`).
pub struct HttpLiveStormSource {
    http: reqwest::Client,
    url: String,
}

impl HttpLiveStormSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: live_storms_url(base_url),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LiveStormSource for HttpLiveStormSource {
    async fn fetch(&self) -> Result<Vec<StormTrackPoint>, ForecastError> {
        tracing::debug!(url = %self.url, "Fetching live storms");
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ForecastError::transport(format!("live storm request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ForecastError::transport(format!(
                "live storm feed returned {status}: {}",
                body.trim()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ForecastError::transport(format!("failed to read live storm feed: {e}")))?;
        parse_records(&body)
    }
}

/// A JSON array of track records on disk.
pub struct FileStormSource {
    path: PathBuf,
}

impl FileStormSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LiveStormSource for FileStormSource {
    async fn fetch(&self) -> Result<Vec<StormTrackPoint>, ForecastError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ForecastError::SourceRead {
                path: self.path.clone(),
                source,
            })?;
        parse_records(&body)
    }
}

/// Parse a feed body. A blank body or `null` means no active storms.
///
/// Rows without a position are dropped; the rest of the feed is kept.
pub fn parse_records(body: &str) -> Result<Vec<StormTrackPoint>, ForecastError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let records: Vec<TrackRecord> = serde_json::from_str(trimmed)
        .map_err(|e| ForecastError::InvalidTrackData(e.to_string()))?;

    let total = records.len();
    let points: Vec<StormTrackPoint> = records
        .into_iter()
        .filter_map(TrackRecord::into_point)
        .collect();
    if points.len() < total {
        tracing::warn!(
            dropped = total - points.len(),
            kept = points.len(),
            "Dropping track records without a position"
        );
    }
    Ok(points)
}

fn live_storms_url(base_url: &str) -> String {
    format!("{}/live-storms", base_url.trim_end_matches('/'))
}
