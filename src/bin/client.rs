//! Command line client.
//!
//! Connects to a TCP tool server, lists its tools and greets the name given
//! as the first argument.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use tool_bridge::core::protocol::Arguments;
use tool_bridge::core::{Config, init_logging};
use tool_bridge::domains::client::{ClientOptions, Session, TcpConnector};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_logging(&config.logging);

    let name = std::env::args().nth(1).unwrap_or_else(|| "Ford".to_string());

    let connector = Arc::new(TcpConnector::new(config.client.endpoint.clone()));
    let session = Session::connect(connector, ClientOptions::from(&config.client))
        .await
        .with_context(|| format!("connecting to {}", config.client.endpoint))?;

    let tools = session.list_tools().await.context("listing tools")?;
    info!("Server offers {} tool(s)", tools.len());
    for tool in tools.iter() {
        println!("{:<12} {}", tool.name, tool.description.as_deref().unwrap_or(""));
    }

    let result = session
        .call_tool("greet", Arguments::new().with("name", name))
        .await
        .context("calling greet")?;
    match result.text() {
        Some(text) => println!("{text}"),
        None => println!("{}", result.value()),
    }

    session.close().await;
    Ok(())
}
