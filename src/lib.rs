pub mod config;
pub mod errors;
pub mod extract;
pub mod forecast;
pub mod llm;
pub mod logging;
pub mod prompts;
pub mod storms;

pub use errors::ForecastError;
