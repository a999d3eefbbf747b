//! Connectors open the byte stream a session runs over.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::core::ToolServer;

/// A connected, bidirectional byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Opens connections to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The endpoint, for logs and errors.
    fn endpoint(&self) -> &str;

    /// Open a fresh connection.
    async fn connect(&self) -> io::Result<Box<dyn Transport>>;
}

/// Connects over TCP to `host:port`.
#[cfg(feature = "tcp")]
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
}

#[cfg(feature = "tcp")]
impl TcpConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[cfg(feature = "tcp")]
#[async_trait]
impl Connector for TcpConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let stream = tokio::net::TcpStream::connect(&self.endpoint).await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", self.endpoint, e);
        }
        debug!(endpoint = %self.endpoint, "connected");
        Ok(Box::new(stream))
    }
}

/// Serves a [`ToolServer`] over an in-memory pipe, one per connect.
#[derive(Clone)]
pub struct InProcessConnector {
    server: ToolServer,
    buffer: usize,
}

impl InProcessConnector {
    pub fn new(server: ToolServer) -> Self {
        Self {
            server,
            buffer: 64 * 1024,
        }
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    fn endpoint(&self) -> &str {
        "in-process"
    }

    async fn connect(&self) -> io::Result<Box<dyn Transport>> {
        let (client, remote) = tokio::io::duplex(self.buffer);
        let server = self.server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(remote).await {
                debug!("In-process session ended: {}", e);
            }
        });
        Ok(Box::new(client))
    }
}
