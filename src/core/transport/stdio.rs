//! STDIO transport implementation.
//!
//! Serves a single session over the process's standard input and output.
//! Logging must stay on stderr while this transport runs.

use tracing::info;

use super::TransportResult;
use crate::core::ToolServer;

/// STDIO transport handler.
pub struct StdioTransport;

impl StdioTransport {
    /// Run the STDIO transport until stdin is closed.
    pub async fn run(server: ToolServer) -> TransportResult<()> {
        info!("Ready - communicating via stdin/stdout");

        server
            .serve_io(tokio::io::stdin(), tokio::io::stdout())
            .await?;

        info!("STDIO transport finished");
        Ok(())
    }
}
