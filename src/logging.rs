//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "STORMCAST_LOG";

static INIT: Once = Once::new();

/// Output format of log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Default filter when `STORMCAST_LOG` is unset or invalid.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "stormcast=debug"
    } else {
        "stormcast=info"
    }
}

/// Install the global subscriber.
///
/// Reads `STORMCAST_LOG` for filter directives, e.g.
/// `STORMCAST_LOG=stormcast::forecast=debug,stormcast::llm=warn`.
/// Events go to stderr so stdout stays machine-readable. Safe to call more
/// than once; only the first call takes effect.
pub fn init_tracing(verbose: bool, format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

        match format {
            LogFormat::Text => tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
                .with(filter)
                .init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(false),
                )
                .with(filter)
                .init(),
        }
    });
}
