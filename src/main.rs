use anyhow::Result;
use clap::Parser;
use snapfile::client::bridge::BridgeClient;
use snapfile::client::MessagingClient;
use snapfile::config::Config;
use snapfile::events::DashboardBus;
use snapfile::filing::FilingEngine;
use snapfile::gateway;
use snapfile::logging::DashboardLogLayer;
use snapfile::store::ImageStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snapfile", version, about = "Message-driven image filing bot with a live web dashboard")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the gateway bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the gateway port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Every tracing event is also mirrored to connected dashboards.
    let bus = DashboardBus::new(256);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(DashboardLogLayer::new(bus.clone()))
        .init();

    let mut config = Config::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let store = Arc::new(ImageStore::new(&config.storage.images_dir));
    let engine = Arc::new(FilingEngine::new(Arc::clone(&store)));
    let client: Arc<dyn MessagingClient> = Arc::new(BridgeClient::new(
        config.bridge.binary.clone(),
        config.storage.auth_dir.clone(),
    ));

    gateway::run_gateway(&config, store, engine, client, bus).await
}
