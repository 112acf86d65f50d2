//! Configuration for stormcast.
//!
//! Settings are layered: `stormcast.toml` → environment → CLI flags. The file
//! is optional; every field has a default.
//!
//! # Configuration File Format
//!
//! ```toml
//! [service]
//! api_url = "https://api.openai.com/v1"
//! model = "gpt-3.5-turbo"
//! request_timeout_secs = 120
//!
//! [live]
//! url = "http://fluids.ai:1337/"
//!
//! [pipeline]
//! lead_times = [6, 12, 24, 48, 72, 96, 120]
//! max_history = 28
//! generation_retries = 5
//! reflection_retries = 5
//! campaign_retries = 10
//! max_concurrency = 4
//! ```
//!
//! The service key is never read from the file; it comes from
//! `OPENAI_API_KEY` (a `.env` file is honoured).

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::ForecastError;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "stormcast.toml";

pub const MODEL_ENV: &str = "STORMCAST_MODEL";
pub const API_URL_ENV: &str = "STORMCAST_API_URL";
pub const LIVE_URL_ENV: &str = "STORMCAST_LIVE_URL";

/// Forecast horizons in hours used by the reflection pipeline.
pub const DEFAULT_LEAD_TIMES: [u32; 7] = [6, 12, 24, 48, 72, 96, 120];

/// Roughly seven days of six-hourly fixes.
pub const DEFAULT_MAX_HISTORY: usize = 4 * 7;

/// Completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-call timeout; a timed-out call is a transport failure.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Live storm feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSection {
    /// Base URL of the feed; `live-storms` is appended.
    #[serde(default = "default_live_url")]
    pub url: String,
}

fn default_live_url() -> String {
    "http://fluids.ai:1337/".to_string()
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            url: default_live_url(),
        }
    }
}

/// Forecast pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_lead_times")]
    pub lead_times: Vec<u32>,
    /// Most recent track points embedded in a prompt.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_generation_retries")]
    pub generation_retries: u32,
    #[serde(default = "default_reflection_retries")]
    pub reflection_retries: u32,
    /// Budget for the single-shot campaign.
    #[serde(default = "default_campaign_retries")]
    pub campaign_retries: u32,
    /// Invocations in flight per phase; unset means one per prompt.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_lead_times() -> Vec<u32> {
    DEFAULT_LEAD_TIMES.to_vec()
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_generation_retries() -> u32 {
    5
}

fn default_reflection_retries() -> u32 {
    5
}

fn default_campaign_retries() -> u32 {
    10
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            lead_times: default_lead_times(),
            max_history: default_max_history(),
            generation_retries: default_generation_retries(),
            reflection_retries: default_reflection_retries(),
            campaign_retries: default_campaign_retries(),
            max_concurrency: None,
        }
    }
}

/// Root of `stormcast.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StormcastConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub live: LiveSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl StormcastConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stormcast.toml")
    }

    /// Load `stormcast.toml` from `dir`, or defaults if it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the file layer: an explicit path must exist, otherwise the
    /// working directory is searched.
    pub fn discover(explicit: Option<&Path>, working_dir: &Path) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                Self::load(path)
            }
            None => Self::load_or_default(working_dir),
        }
    }

    /// Apply the environment layer from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply the environment layer from an arbitrary lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty(MODEL_ENV) {
            self.service.model = model;
        }
        if let Some(url) = non_empty(API_URL_ENV) {
            self.service.api_url = url;
        }
        if let Some(url) = non_empty(LIVE_URL_ENV) {
            self.live.url = url;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ForecastError> {
        let pipeline = &self.pipeline;
        if pipeline.lead_times.is_empty() {
            return Err(ForecastError::Config("lead_times must not be empty".into()));
        }
        if pipeline.lead_times.contains(&0) {
            return Err(ForecastError::Config("lead_times must be positive".into()));
        }
        if pipeline.max_history == 0 {
            return Err(ForecastError::Config("max_history must be at least 1".into()));
        }
        for (name, value) in [
            ("generation_retries", pipeline.generation_retries),
            ("reflection_retries", pipeline.reflection_retries),
            ("campaign_retries", pipeline.campaign_retries),
        ] {
            if value == 0 {
                return Err(ForecastError::Config(format!("{name} must be at least 1")));
            }
        }
        if pipeline.max_concurrency == Some(0) {
            return Err(ForecastError::Config("max_concurrency must be at least 1".into()));
        }
        if self.service.model.trim().is_empty() {
            return Err(ForecastError::Config("model must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = StormcastConfig::default();
        assert_eq!(config.service.model, "gpt-3.5-turbo");
        assert_eq!(config.pipeline.lead_times, vec![6, 12, 24, 48, 72, 96, 120]);
        assert_eq!(config.pipeline.max_history, 28);
        assert_eq!(config.pipeline.generation_retries, 5);
        assert_eq!(config.pipeline.campaign_retries, 10);
        assert!(config.pipeline.max_concurrency.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = StormcastConfig::parse(
            r#"
            [service]
            model = "gpt-4"

            [pipeline]
            lead_times = [12, 24]
            max_concurrency = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.service.model, "gpt-4");
        assert_eq!(config.service.api_url, "https://api.openai.com/v1");
        assert_eq!(config.pipeline.lead_times, vec![12, 24]);
        assert_eq!(config.pipeline.max_concurrency, Some(2));
        assert_eq!(config.pipeline.reflection_retries, 5);
        assert_eq!(config.live.url, "http://fluids.ai:1337/");
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = StormcastConfig::parse("[service\nmodel = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = StormcastConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.pipeline.max_history, DEFAULT_MAX_HISTORY);
    }

    #[test]
    fn test_load_or_default_reads_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[pipeline]\nmax_history = 8\n",
        )
        .unwrap();
        let config = StormcastConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.pipeline.max_history, 8);
    }

    #[test]
    fn test_discover_explicit_missing_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = StormcastConfig::discover(Some(&missing), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_env_layer_overrides_file() {
        let mut config = StormcastConfig::default();
        let env: HashMap<&str, &str> = HashMap::from([
            (MODEL_ENV, "gpt-4o-mini"),
            (LIVE_URL_ENV, "http://localhost:1337/"),
            (API_URL_ENV, "  "),
        ]);
        config.apply_env_with(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.service.model, "gpt-4o-mini");
        assert_eq!(config.live.url, "http://localhost:1337/");
        // Blank values are ignored.
        assert_eq!(config.service.api_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_validate_rejects_bad_pipeline() {
        let mut config = StormcastConfig::default();
        config.pipeline.lead_times.clear();
        assert!(matches!(config.validate(), Err(ForecastError::Config(_))));

        let mut config = StormcastConfig::default();
        config.pipeline.lead_times = vec![0, 12];
        assert!(config.validate().is_err());

        let mut config = StormcastConfig::default();
        config.pipeline.generation_retries = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("generation_retries"));

        let mut config = StormcastConfig::default();
        config.pipeline.max_concurrency = Some(0);
        assert!(config.validate().is_err());
    }
}
