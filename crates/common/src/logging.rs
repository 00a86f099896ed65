//! Logging setup and configuration

use tracing_subscriber::{EnvFilter, fmt, fmt::MakeWriter, prelude::*};

/// Setup tracing subscriber for the application
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    tracing_subscriber::registry()
        .with(build_filter(default_level)?)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to install subscriber: {}", e)))?;

    Ok(())
}

/// Setup tracing subscriber writing plain text to a custom writer
///
/// Used by the interactive mode, where diagnostics must not be written
/// over the terminal UI.
pub fn setup_logging_to<W>(default_level: &str, writer: W) -> crate::Result<()>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(build_filter(default_level)?)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to install subscriber: {}", e)))?;

    Ok(())
}

fn build_filter(default_level: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}
