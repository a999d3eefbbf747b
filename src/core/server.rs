//! Tool server: connection handling and call dispatch.
//!
//! A [`ToolServer`] serves the tools of one [`ToolRegistry`] over any
//! bidirectional byte stream. Each connection gets a reader loop that decodes
//! client frames, a writer task that owns the outbound half, and one task per
//! in-flight call, so unrelated calls never wait on each other.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, warn};

use super::call::{CallState, execute_call};
use super::config::ServerConfig;
use super::protocol::{
    CallId, ClientMessage, DecodeError, ErrorCode, FrameCodec, ServerMessage, ToolCallChunk,
    ToolCallRequest, ToolDescriptor, decode_request, salvage_call_id,
};
use crate::domains::tools::{ToolRegistry, builtin_registry};

/// The tool server.
///
/// Cheap to clone; clones share the registry and configuration.
#[derive(Clone)]
pub struct ToolServer {
    /// Server configuration.
    config: Arc<ServerConfig>,

    /// Registered tools, immutable while serving.
    registry: Arc<ToolRegistry>,
}

impl ToolServer {
    /// Create a server exposing the built-in tools.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, builtin_registry())
    }

    /// Create a server exposing the given registry.
    pub fn with_registry(config: ServerConfig, registry: ToolRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.version
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the tool registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Tool descriptors in registration order.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    /// Run one call on its own task, emitting chunks into `sink`.
    pub fn spawn_call(
        &self,
        request: ToolCallRequest,
        sink: mpsc::Sender<ServerMessage>,
    ) -> JoinHandle<CallState> {
        let registry = Arc::clone(&self.registry);
        let max_chunk_bytes = self.config.max_chunk_bytes;
        tokio::spawn(execute_call(registry, request, max_chunk_bytes, sink))
    }

    /// Serve one connection until the peer closes it.
    pub async fn serve<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.serve_io(reader, writer).await
    }

    /// Serve one connection given as separate read and write halves.
    ///
    /// Returns once the read half reaches end of stream. Calls still running
    /// at that point are aborted.
    pub async fn serve_io<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let codec = FrameCodec::new(self.config.max_frame_bytes);
        let writer_task = tokio::spawn(write_loop(FramedWrite::new(writer, codec.clone()), rx));

        let mut frames = FramedRead::new(reader, codec);
        let mut calls: HashMap<CallId, JoinHandle<CallState>> = HashMap::new();

        let result = loop {
            let frame = match frames.next().await {
                Some(Ok(Ok(frame))) => frame,
                None => break Ok(()),
                Some(Err(DecodeError::Io(e))) => break Err(e),
                Some(Ok(Err(e)) | Err(e)) => {
                    warn!("Dropping unreadable frame: {}", e);
                    let _ = tx.send(ServerMessage::ProtocolError { message: e.to_string() }).await;
                    continue;
                }
            };

            calls.retain(|_, handle| !handle.is_finished());

            match decode_request(frame.as_bytes()) {
                Ok(ClientMessage::ListTools { request_id }) => {
                    debug!(request_id, "listing tools");
                    let tools = self.list_tools();
                    if tx.send(ServerMessage::Tools { request_id, tools }).await.is_err() {
                        break Ok(());
                    }
                }
                Ok(ClientMessage::Call(request)) => {
                    if calls.contains_key(&request.call_id) {
                        warn!("Rejecting reused call id {}", request.call_id);
                        let message = format!("call id {} is already in flight", request.call_id);
                        let _ = tx.send(ServerMessage::ProtocolError { message }).await;
                        continue;
                    }
                    let call_id = request.call_id.clone();
                    let handle = self.spawn_call(request, tx.clone());
                    calls.insert(call_id, handle);
                }
                Ok(ClientMessage::Cancel { call_id }) => {
                    if let Some(handle) = calls.remove(&call_id) {
                        debug!(call_id = %call_id, "call cancelled by client");
                        handle.abort();
                    }
                }
                Err(e) => {
                    warn!("Rejecting malformed frame: {}", e);
                    let reply = match salvage_call_id(frame.as_bytes()) {
                        Some(call_id) => ServerMessage::Chunk(ToolCallChunk::error(
                            call_id,
                            0,
                            ErrorCode::InvalidRequest,
                            e.to_string(),
                        )),
                        None => ServerMessage::ProtocolError { message: e.to_string() },
                    };
                    let _ = tx.send(reply).await;
                }
            }
        };

        if !calls.is_empty() {
            info!("Connection closed, aborting {} in-flight call(s)", calls.len());
        }
        for (_, handle) in calls.drain() {
            handle.abort();
        }
        drop(tx);

        match writer_task.await {
            Ok(Err(e)) => debug!("Writer stopped: {}", e),
            Err(e) => warn!("Writer task failed: {}", e),
            Ok(Ok(())) => {}
        }
        result
    }
}

/// Write outbound messages until every sender is gone.
#[instrument(skip_all)]
async fn write_loop<W>(
    mut frames: FramedWrite<W, FrameCodec>,
    mut rx: mpsc::Receiver<ServerMessage>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        frames.send(message).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{Arguments, ChunkBody, decode_response};
    use crate::domains::tools::{ToolDefinition, ToolError, ToolOutput};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::sync::oneshot;

    struct Peer {
        reader: FramedRead<ReadHalf<DuplexStream>, FrameCodec>,
        writer: FramedWrite<WriteHalf<DuplexStream>, FrameCodec>,
    }

    impl Peer {
        async fn send(&mut self, message: &ClientMessage) {
            self.writer.send(message).await.unwrap();
        }

        async fn send_raw(&mut self, raw: &[u8]) {
            let writer = self.writer.get_mut();
            writer.write_all(raw).await.unwrap();
            writer.flush().await.unwrap();
        }

        async fn recv(&mut self) -> Option<ServerMessage> {
            let frame = self.reader.next().await?.unwrap().unwrap();
            Some(decode_response(frame.as_bytes()).unwrap())
        }
    }

    fn start(server: ToolServer) -> (Peer, JoinHandle<io::Result<()>>) {
        let (client, remote) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move { server.serve(remote).await });
        let (reader, writer) = tokio::io::split(client);
        let peer = Peer {
            reader: FramedRead::new(reader, FrameCodec::default()),
            writer: FramedWrite::new(writer, FrameCodec::default()),
        };
        (peer, task)
    }

    fn call(id: &str, tool: &str, arguments: Arguments) -> ClientMessage {
        ClientMessage::Call(ToolCallRequest {
            call_id: CallId::from(id),
            tool: tool.to_string(),
            arguments,
        })
    }

    #[tokio::test]
    async fn test_list_tools_in_registration_order() {
        let (mut peer, _task) = start(ToolServer::new(ServerConfig::default()));
        peer.send(&ClientMessage::ListTools { request_id: 7 }).await;

        let Some(ServerMessage::Tools { request_id, tools }) = peer.recv().await else {
            panic!("expected a tool list");
        };
        assert_eq!(request_id, 7);
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["greet", "countdown"]);
    }

    #[tokio::test]
    async fn test_greet_round_trip() {
        let (mut peer, _task) = start(ToolServer::new(ServerConfig::default()));
        peer.send(&call("a", "greet", Arguments::new().with("name", "Ford"))).await;

        assert_eq!(
            peer.recv().await,
            Some(ServerMessage::Chunk(ToolCallChunk::data(
                CallId::from("a"),
                0,
                json!("Hello, Ford!"),
                true
            )))
        );
    }

    #[tokio::test]
    async fn test_malformed_call_is_answered_on_its_call_id() {
        let (mut peer, _task) = start(ToolServer::new(ServerConfig::default()));
        peer.send_raw(br#"{"type":"call","call_id":"bad","tool":"greet","arguments":[1]}"#)
            .await;
        peer.send_raw(b"\n").await;

        let Some(ServerMessage::Chunk(chunk)) = peer.recv().await else {
            panic!("expected an error chunk");
        };
        assert_eq!(chunk.call_id, CallId::from("bad"));
        assert!(chunk.terminal);
        assert!(matches!(
            chunk.body,
            ChunkBody::Error { code: ErrorCode::InvalidRequest, .. }
        ));
    }

    #[tokio::test]
    async fn test_garbage_frame_is_a_protocol_error() {
        let (mut peer, _task) = start(ToolServer::new(ServerConfig::default()));
        peer.send_raw(b"not json\n").await;
        assert!(matches!(
            peer.recv().await,
            Some(ServerMessage::ProtocolError { .. })
        ));

        // The connection survives.
        peer.send(&ClientMessage::ListTools { request_id: 1 }).await;
        assert!(matches!(peer.recv().await, Some(ServerMessage::Tools { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_independent() {
        let (mut peer, _task) = start(ToolServer::new(ServerConfig::default()));
        peer.send(&call("slow", "countdown", Arguments::new().with("from", 2).with("interval_ms", 50)))
            .await;
        peer.send(&call("fast", "greet", Arguments::new().with("name", "Arthur"))).await;

        // The quick call completes before the slow one produces anything.
        let Some(ServerMessage::Chunk(first)) = peer.recv().await else {
            panic!("expected a chunk");
        };
        assert_eq!(first.call_id, CallId::from("fast"));

        let mut slow = Vec::new();
        while let Some(ServerMessage::Chunk(chunk)) = peer.recv().await {
            assert_eq!(chunk.call_id, CallId::from("slow"));
            let done = chunk.terminal;
            slow.push(chunk);
            if done {
                break;
            }
        }
        assert_eq!(slow.len(), 3);
    }

    /// A registry with one tool that never finishes. It reports when it
    /// starts and when its future is dropped.
    fn hanging_registry(started: oneshot::Sender<()>, dropped: oneshot::Sender<()>) -> ToolRegistry {
        struct DropSignal(Option<oneshot::Sender<()>>);
        impl Drop for DropSignal {
            fn drop(&mut self) {
                if let Some(tx) = self.0.take() {
                    let _ = tx.send(());
                }
            }
        }

        let slots = Arc::new(Mutex::new(Some((started, dropped))));
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::new("hang", move |_args: Arguments| {
                let signals = slots.lock().unwrap().take();
                async move {
                    let Some((started, dropped)) = signals else {
                        return Err(ToolError::internal("hang called twice"));
                    };
                    let _signal = DropSignal(Some(dropped));
                    let _ = started.send(());
                    futures::future::pending::<()>().await;
                    Ok::<_, ToolError>(ToolOutput::value(0))
                }
            }))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_cancel_aborts_the_call() {
        let (started_tx, started_rx) = oneshot::channel();
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let registry = hanging_registry(started_tx, dropped_tx);
        let (mut peer, _task) = start(ToolServer::with_registry(ServerConfig::default(), registry));

        peer.send(&call("h", "hang", Arguments::new())).await;
        started_rx.await.unwrap();
        peer.send(&ClientMessage::Cancel { call_id: CallId::from("h") }).await;

        tokio::time::timeout(Duration::from_secs(5), dropped_rx)
            .await
            .expect("handler was not aborted")
            .unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_aborts_in_flight_calls() {
        let (started_tx, started_rx) = oneshot::channel();
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let registry = hanging_registry(started_tx, dropped_tx);
        let (mut peer, task) = start(ToolServer::with_registry(ServerConfig::default(), registry));

        peer.send(&call("h", "hang", Arguments::new())).await;
        started_rx.await.unwrap();
        peer.writer.get_mut().shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), dropped_rx)
            .await
            .expect("handler was not aborted")
            .unwrap();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(peer.recv().await, None);
    }
}
