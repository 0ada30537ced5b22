use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Debug builds print human-readable lines, release builds emit JSON. The
/// level comes from `RUST_LOG` and defaults to `info`. A second call leaves
/// the first subscriber in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
