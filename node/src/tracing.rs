use tracing_subscriber::{prelude::*, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. Verbosity is controlled through
/// `RUST_LOG`, e.g. `RUST_LOG=rp_node=debug` to see skipped minipools.
pub fn init() {
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();
}
