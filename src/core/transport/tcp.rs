//! TCP transport implementation.
//!
//! Each accepted connection is one client session carrying
//! newline-delimited frames.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, instrument, warn};

use super::{TransportError, TransportResult, config::TcpConfig};
use crate::core::ToolServer;

/// TCP transport handler.
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a new TCP transport with the given config.
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    /// Get the bind address.
    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Bind and serve until the process exits.
    pub async fn run(self, server: ToolServer) -> TransportResult<()> {
        let addr = self.address();

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::bind(&addr, e))?;

        info!("Ready - listening on {} (tool frames over TCP)", addr);
        Self::serve(listener, server).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(listener: TcpListener, server: ToolServer) -> TransportResult<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    // Set TCP_NODELAY to disable Nagle's algorithm
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
                    }

                    let server = server.clone();
                    tokio::spawn(async move {
                        Self::handle_connection(server, stream, peer_addr).await;
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    // Small delay to avoid spinning on persistent errors
                    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Handle a single TCP connection.
    #[instrument(skip(server, stream), fields(peer = %peer_addr))]
    async fn handle_connection(server: ToolServer, stream: TcpStream, peer_addr: SocketAddr) {
        info!("Client connected");
        match server.serve(stream).await {
            Ok(()) => info!("Client disconnected cleanly"),
            Err(e) => warn!("Error while serving client: {}", e),
        }
    }
}
