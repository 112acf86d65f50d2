//! The generate → reflect forecast pipeline.

pub mod invoker;
pub mod orchestrator;
pub mod types;

pub use invoker::RetryingInvoker;
pub use orchestrator::{ForecastOrchestrator, new_run_tag};
pub use types::{
    CompletionResult, Forecast, ForecastRequest, Phase, RunOutcome, RunReport, StormReport,
    StormStatus,
};
