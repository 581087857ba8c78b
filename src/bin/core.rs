//! Expandr daemon
//!
//! Loads the configuration, installs the keyboard hook and expands snippets
//! until Ctrl+C. An optional argument points at a config file to use instead
//! of the default location.

use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use expandr::{load_config, load_config_from, AppConfig};

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|e| {
            eprintln!(
                "Failed to parse RUST_LOG environment variable: {}. Using default 'info' level.",
                e
            );
            EnvFilter::new("info")
        }))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    info!("Expandr daemon starting...");

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => load_config_from(&path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => load_config().context("Failed to load configuration")?,
    };

    if let Err(e) = run(config) {
        error!("Daemon stopped with error: {:#}", e);
        return Err(e);
    }
    info!("Expandr daemon exited cleanly");
    Ok(())
}

#[cfg(windows)]
fn run(config: AppConfig) -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::thread;

    use expandr::{ExpansionEngine, SnippetCatalog, WindowsInputSink, WindowsKeystrokeSource};

    let catalog = Arc::new(SnippetCatalog::new(config.snippets));
    info!("Loaded {} snippets", catalog.len());

    let mut engine = ExpansionEngine::new(
        WindowsKeystrokeSource::new(),
        Arc::new(WindowsInputSink::new()),
        catalog,
        &config.engine,
    )
    .context("Failed to create expansion engine")?;

    let notices = engine.subscribe();
    thread::Builder::new()
        .name("expandr-notices".into())
        .spawn(move || {
            for notice in notices {
                info!(
                    keyword = %notice.keyword,
                    at = %notice.expanded_at.format("%H:%M:%S"),
                    "Expanded snippet"
                );
            }
        })
        .context("Failed to spawn notice logger")?;

    engine.start().context("Failed to install keyboard hook")?;
    engine.set_enabled(config.engine.enabled_on_start);

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    info!("Expandr running. Press Ctrl+C to exit.");
    let _ = shutdown_rx.recv();

    info!("Shutting down...");
    engine.stop().context("Failed to remove keyboard hook")?;
    Ok(())
}

#[cfg(not(windows))]
fn run(config: AppConfig) -> anyhow::Result<()> {
    info!(
        "Configuration holds {} snippets, but no keyboard backend exists for this platform",
        config.snippets.len()
    );
    Err(expandr::ExpandrError::UnsupportedPlatform.into())
}
