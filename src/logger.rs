use tracing_subscriber::{EnvFilter, fmt};

/// Install a `tracing-subscriber` `fmt` layer.
///
/// Level is controlled by `RUST_LOG`; defaults to `info` when unset or invalid.
/// This is not called by library code itself — only by the inspection binary
/// and by tests that want human-readable traces.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("logger initialized");
}
