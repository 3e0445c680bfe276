mod logger;

use anyhow::Context;
use clap::Parser;
use logger::Logger;
use std::{env::current_dir, path::PathBuf, sync::Arc};
use tag_gateway_core::{HttpControllerApi, TagGateway};
use tag_gateway_models::{constants::DEFAULT_CONFIG_FILE_NAME, settings::Settings};
use tag_gateway_opcua::OpcUaConnector;
use tag_gateway_web::TagGatewayWebServer;
use tracing::info;

/// Tag gateway - keeps business tags in sync with OPC UA endpoints
#[derive(Parser)]
#[command(name = "tag-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tag Gateway", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, the gateway looks for 'tag-gateway.toml'
    /// in the current working directory.
    #[arg(short, long, env = "TAG_GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => current_dir()
            .context("Failed to get current directory")?
            .join(DEFAULT_CONFIG_FILE_NAME),
    };
    let settings = Settings::new(config_path.to_string_lossy().to_string())
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;

    let mut logger = Logger::new(&settings.log);
    logger.initialize()?;
    info!(config = %config_path.display(), "Starting tag gateway");

    let controller = HttpControllerApi::new(settings.controller.clone())?;
    let gateway = Arc::new(TagGateway::new(
        &settings,
        Arc::new(OpcUaConnector::new()),
        Arc::new(controller),
    ));
    gateway.start().await;

    let web = TagGatewayWebServer::init(&settings, Arc::clone(&gateway))?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    web.stop().await;
    gateway.shutdown().await;
    info!("Tag gateway stopped");
    Ok(())
}
