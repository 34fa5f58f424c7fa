use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber filtered by `RUST_LOG`.
///
/// Meant for the process hosting the rollup; the library itself never calls
/// it.
pub fn init() {
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();
}

/// Same as [`init`], but does nothing if a global subscriber is already set.
pub fn try_init() {
    let _ = tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_test_writer()
                .with_filter(EnvFilter::from_default_env()),
        )
        .try_init();
}
