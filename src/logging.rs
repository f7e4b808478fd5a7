use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber.
///
/// Defaults to `info`, or `debug` with `verbose`; `RUST_LOG` overrides both.
pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    tracing::debug!("Debug logging is enabled");
    Ok(())
}
