use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global tracing subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second init (tests, embedded use) is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
