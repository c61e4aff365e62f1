//! Console logging for binaries embedding the engine.
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs a global subscriber: formatted events filtered by `RUST_LOG`
/// (default `info`), with the engine's progress bars drawn by indicatif.
///
/// Fails when a global subscriber is already set.
pub fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer())
                .with_filter(filter),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}
