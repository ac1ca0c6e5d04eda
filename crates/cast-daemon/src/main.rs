mod engine;
mod http;
mod mpv;
mod socket;

use std::sync::Arc;

use cast_core::{CastCore, CoreEvent, JsonFileSettingsStore, EVENT_CHANNEL_CAPACITY};
use cast_proto::config::Config;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = cast_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("neuralcast.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,cast_core=debug,neuralcast=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let stations = cast_proto::stations::load_stations(&config).await;
    let store = Arc::new(JsonFileSettingsStore::new(config.daemon.settings_file.clone()));
    info!("Settings file: {:?}", store.path());
    let connector = Arc::new(engine::MpvConnector::new(config.mpv.clone()));

    // Every input funnels into CastCore through this channel.
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<CoreEvent>(EVENT_CHANNEL_CAPACITY);
    let core = CastCore::new(stations, connector, store, event_tx);
    let handle = core.handle();

    let _socket_handle = socket::start_server(
        config.daemon.bind_address.clone(),
        config.daemon.ui_port,
        handle.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            handle.clone(),
        );
    }

    let shutdown = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown.shutdown().await;
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    info!("Host initialised, running event loop");
    core.run(event_rx).await?;

    Ok(())
}
