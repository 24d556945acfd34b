use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. Logs go to stderr so stdout stays
/// reserved for command output.
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        warn!(error = %e, "tracing init failed");
    }
}
