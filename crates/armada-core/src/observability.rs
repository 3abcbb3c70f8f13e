use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Default filter: info from the workspace crates, warn from everything
/// else. Target prefixes must name each crate; a bare `armada` prefix
/// would not match `armada_core` and friends.
const DEFAULT_DIRECTIVES: &str =
    "warn,armadactl=info,armada_core=info,armada_keys=info,armada_sched=info,armada_fleet=info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable compact output (interactive CLI use).
    Human,
    /// Structured JSON output (daemon mode).
    Json,
}

/// Initialize the global tracing subscriber. Call once at startup;
/// `RUST_LOG` overrides the default directives.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Human => {
            registry
                .with(fmt::layer().compact().with_target(false))
                .init();
        }
        LogFormat::Json => {
            registry
                .with(fmt::layer().json().flatten_event(true))
                .init();
        }
    }
}
