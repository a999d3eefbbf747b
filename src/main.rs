//! Tool Server Entry Point
//!
//! Loads configuration, initializes logging and serves the built-in tools
//! over the configured transport.

use anyhow::Result;
use tracing::info;

use tool_bridge::core::{Config, ToolServer, TransportService, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_logging(&config.logging);

    info!("Starting {} v{}", config.server.name, config.server.version);

    let server = ToolServer::new(config.server);
    info!("Serving {} tool(s)", server.list_tools().len());

    let transport = TransportService::new(config.transport);
    transport.run(server).await?;

    info!("Server shutting down");

    Ok(())
}
