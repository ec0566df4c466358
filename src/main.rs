use color_eyre::{eyre::eyre, Result};
use openremap::config::{bootstrap_subscriber, AppConfig};
use openremap::controller::{event_queue, ControllerHandle};
use openremap::mapping::{ChannelSink, CustomHandlers, MappingEngineHandle};
use openremap::persistence::{ensure_default_profile, load_profile};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let config = setup().await?;

    let profile_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| config.profile_path());
    ensure_default_profile(&profile_path).await?;
    let profile = load_profile(&profile_path).await?;

    let (producer, stream) = event_queue::channel(config.queue_capacity);

    // Virtual output devices are driver specific, commands are logged until one is attached
    let (sink, mut output_rx) = ChannelSink::channel(config.output_capacity);
    let output_task = tokio::spawn(async move {
        while let Some(command) = output_rx.recv().await {
            debug!("Virtual output: {:?}", command);
        }
    });

    let mut engine = MappingEngineHandle::new(profile.name.clone());
    let mut mode_rx = engine
        .start(
            &profile,
            stream,
            Arc::new(sink),
            CustomHandlers::with_builtins(),
        )
        .map_err(|e| eyre!("Failed to start mapping engine: {}", e))?;

    let mode_task = tokio::spawn(async move {
        while mode_rx.changed().await.is_ok() {
            info!("Active mode: {}", *mode_rx.borrow());
        }
    });

    info!("Initializing controller");
    let mut controller = ControllerHandle::spawn(Some(config.controller_settings()), producer)
        .await
        .map_err(|e| eyre!("Failed to spawn controller: {}", e))?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to wait for Ctrl-C: {}", e))?;
    info!("Shutting down");

    controller.shutdown().await;
    if let Err(e) = engine.shutdown().await {
        error!("Mapping engine stopped with error: {}", e);
    }
    let _ = output_task.await;
    mode_task.abort();
    Ok(())
}

async fn setup() -> Result<AppConfig> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let config = AppConfig::load_with(
        &AppConfig::config_path(),
        bootstrap_subscriber(Level::INFO, std::io::stderr),
    )
    .await?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &config.log_level)
    }
    setup_logging_env(config.level());
    debug!("Running with {:?}", config);
    Ok(config)
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
