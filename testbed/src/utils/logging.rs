use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber for a testbed binary. The level comes from
/// `RUST_LOG` and falls back to `info`. Calling it twice is harmless.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .try_init();
}
