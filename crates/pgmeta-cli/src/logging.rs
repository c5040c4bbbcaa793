use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `--debug` lowers the default level to
/// `debug`; `RUST_LOG` still wins when set.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}
