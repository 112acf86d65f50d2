//! Typed error hierarchy for the forecast pipeline.
//!
//! `ForecastError` covers every failure the pipeline can observe. Only
//! `Extraction` and `Parse` are recovered locally (by the retry loop); the
//! rest are surfaced as a failed unit of work for one request.

use thiserror::Error;

/// Errors from the forecast pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Network, authentication, rate-limit or availability failure of a
    /// single service call. Never retried by the pipeline.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// No `{ ... }` span could be located in the reply.
    #[error("No JSON object found in response")]
    Extraction,

    /// A brace span was found but it is not a valid JSON object, or the
    /// object does not have the expected shape.
    #[error("Failed to parse JSON from response: {message}")]
    Parse { message: String },

    /// A conversation was referenced before it was created.
    #[error("Conversation {request_id} not found")]
    UnknownThread { request_id: String },

    /// No live storms or no track history. A terminal state, not a failure.
    #[error("No track data for {subject}")]
    EmptyInput { subject: String },

    #[error("Conversation store lock poisoned")]
    LockPoisoned,

    #[error("Invalid track data: {0}")]
    InvalidTrackData(String),

    #[error("Failed to read storm data at {path}: {source}")]
    SourceRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ForecastError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }
}
