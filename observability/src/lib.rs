//! # Logging and metrics helpers

mod log_fmt;
mod request;

use error_stack::{Result, ResultExt};
use opentelemetry::global;
use tracing::Subscriber;
use tracing_subscriber::{prelude::*, registry::LookupSpan, EnvFilter, Layer};

pub use opentelemetry::metrics::{Counter, Histogram, Meter};
pub use opentelemetry::KeyValue;

pub use self::log_fmt::CompactFormat;
pub use self::request::{RecordRequest, RecordedRequest, RequestMetrics};

const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug)]
pub struct ObservabilityInitError;
impl error_stack::Context for ObservabilityInitError {}

impl std::fmt::Display for ObservabilityInitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("failed to initialize tracing")
    }
}

pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Initialize the global tracing subscriber.
///
/// Logs are filtered with `RUST_LOG` (defaults to `info`) and written to stderr either with the
/// compact formatter or, if `RUST_LOG_FORMAT=json`, as JSON objects.
pub fn init_tracing() -> Result<(), ObservabilityInitError> {
    tracing_subscriber::registry()
        .with(stderr())
        .try_init()
        .change_context(ObservabilityInitError)
        .attach_printable("a global subscriber is already installed")
}

fn stderr<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let log_env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_fmt = std::env::var(RUST_LOG_FORMAT)
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(log_env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .event_format(CompactFormat)
            .with_filter(log_env_filter)
            .boxed()
    }
}
