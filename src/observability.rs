use biometrics::{Collector, Counter, Moments};
use tracing_subscriber::{EnvFilter, fmt};

/// Log level used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "warn";

pub(crate) static GATEWAY_REQUESTS: Counter = Counter::new("colloquy.gateway.requests");
pub(crate) static GATEWAY_REQUEST_ERRORS: Counter =
    Counter::new("colloquy.gateway.request_errors");
pub(crate) static GATEWAY_REQUEST_DURATION: Moments =
    Moments::new("colloquy.gateway.request_duration_seconds");

pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("colloquy.stream.fragments");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("colloquy.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("colloquy.stream.bytes");
pub(crate) static STREAM_DURATION: Moments = Moments::new("colloquy.stream.duration_seconds");

pub(crate) static STORE_LOADS: Counter = Counter::new("colloquy.store.loads");
pub(crate) static STORE_SAVES: Counter = Counter::new("colloquy.store.saves");
pub(crate) static STORE_SAVE_ERRORS: Counter = Counter::new("colloquy.store.save_errors");

pub(crate) static TURNS_STARTED: Counter = Counter::new("colloquy.controller.turns_started");
pub(crate) static TURNS_COMPLETED: Counter = Counter::new("colloquy.controller.turns_completed");
pub(crate) static TURNS_FAILED: Counter = Counter::new("colloquy.controller.turns_failed");
pub(crate) static TURNS_CANCELLED: Counter = Counter::new("colloquy.controller.turns_cancelled");
pub(crate) static TURNS_REJECTED: Counter = Counter::new("colloquy.controller.turns_rejected");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&GATEWAY_REQUESTS);
    collector.register_counter(&GATEWAY_REQUEST_ERRORS);
    collector.register_moments(&GATEWAY_REQUEST_DURATION);

    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&STORE_LOADS);
    collector.register_counter(&STORE_SAVES);
    collector.register_counter(&STORE_SAVE_ERRORS);

    collector.register_counter(&TURNS_STARTED);
    collector.register_counter(&TURNS_COMPLETED);
    collector.register_counter(&TURNS_FAILED);
    collector.register_counter(&TURNS_CANCELLED);
    collector.register_counter(&TURNS_REJECTED);
}

/// Install the tracing subscriber used by the binaries.
///
/// Logs go to stderr so they never interleave with the transcript on stdout.  `RUST_LOG`
/// overrides the default `warn` filter.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_count() {
        let collector = Collector::new();
        register_biometrics(collector);
        TURNS_STARTED.click();
        STREAM_BYTES.count(16);
        STREAM_DURATION.add(0.25);
    }

    #[test]
    fn init_logging_twice_is_harmless() {
        init_logging();
        init_logging();
    }
}
