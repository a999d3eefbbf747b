//! Client sessions.
//!
//! A [`Session`] owns one logical connection to a tool server. Behind it a
//! reader task routes incoming chunks to the call they belong to and a
//! writer task serializes outgoing frames, so any number of calls can be in
//! flight on one session at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, warn};

use super::cache::{ToolListCache, ToolListCacheEntry};
use super::connector::{Connector, Transport};
use super::error::{CallError, ConnectionError};
use super::options::ClientOptions;
use super::reassembly::{Progress, Reassembler, ToolResult};
use crate::core::protocol::{
    Arguments, CallId, ClientMessage, ErrorCode, FrameCodec, ServerMessage, ToolCallChunk,
    ToolCallRequest, ToolDescriptor, decode_response,
};

const OUTBOUND_BUFFER: usize = 64;

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Routing
// ============================================================================

/// Where incoming frames of one connection go.
///
/// Once closed, every route is dropped and no new route can be opened, so
/// waiters observe the loss instead of hanging.
#[derive(Default)]
struct Routes {
    closed: AtomicBool,
    calls: StdMutex<HashMap<CallId, mpsc::UnboundedSender<ToolCallChunk>>>,
    listings: StdMutex<HashMap<u64, oneshot::Sender<Vec<ToolDescriptor>>>>,
}

impl Routes {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let mut calls = lock(&self.calls);
        self.closed.store(true, Ordering::SeqCst);
        calls.clear();
        drop(calls);
        lock(&self.listings).clear();
    }

    fn open_call(&self, call_id: &CallId) -> Option<mpsc::UnboundedReceiver<ToolCallChunk>> {
        let mut calls = lock(&self.calls);
        if self.is_closed() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        calls.insert(call_id.clone(), tx);
        Some(rx)
    }

    fn release_call(&self, call_id: &CallId) {
        lock(&self.calls).remove(call_id);
    }

    fn route_chunk(&self, chunk: ToolCallChunk) {
        let calls = lock(&self.calls);
        match calls.get(&chunk.call_id) {
            Some(tx) => {
                let _ = tx.send(chunk);
            }
            None => debug!(call_id = %chunk.call_id, seq = chunk.seq, "dropping chunk for released call"),
        }
    }

    fn open_listing(&self, request_id: u64) -> Option<oneshot::Receiver<Vec<ToolDescriptor>>> {
        let mut listings = lock(&self.listings);
        if self.is_closed() {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        listings.insert(request_id, tx);
        Some(rx)
    }

    fn release_listing(&self, request_id: u64) {
        lock(&self.listings).remove(&request_id);
    }

    fn route_listing(&self, request_id: u64, tools: Vec<ToolDescriptor>) {
        match lock(&self.listings).remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(tools);
            }
            None => debug!(request_id, "dropping unexpected tool list"),
        }
    }

    fn in_flight(&self) -> Vec<CallId> {
        lock(&self.calls).keys().cloned().collect()
    }
}

// ============================================================================
// Link
// ============================================================================

/// One live connection and its I/O tasks.
struct Link {
    /// Value of the session's connect counter once this link is installed.
    generation: u64,
    outbound: mpsc::Sender<ClientMessage>,
    routes: Arc<Routes>,
    tasks: [JoinHandle<()>; 2],
}

impl Link {
    fn spawn(stream: Box<dyn Transport>, max_frame_bytes: usize, generation: u64) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let routes = Arc::new(Routes::default());
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER);

        let codec = FrameCodec::new(max_frame_bytes);
        let frames = FramedWrite::new(writer, codec.clone());
        let writer = tokio::spawn(write_loop(frames, rx, Arc::clone(&routes)));
        let frames = FramedRead::new(reader, codec);
        let reader = tokio::spawn(read_loop(frames, Arc::clone(&routes)));
        Self {
            generation,
            outbound,
            routes,
            tasks: [reader, writer],
        }
    }

    fn is_closed(&self) -> bool {
        self.routes.is_closed()
    }

    async fn send(&self, message: ClientMessage) -> Result<(), CallError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| CallError::unreachable("connection closed"))
    }

    fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.routes.close();
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_loop<R>(mut frames: FramedRead<R, FrameCodec>, routes: Arc<Routes>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match frames.next().await {
            Some(Ok(Ok(frame))) => frame,
            None => {
                debug!("server closed the connection");
                break;
            }
            Some(Ok(Err(e))) => {
                warn!("Skipping unreadable frame: {}", e);
                continue;
            }
            Some(Err(e)) => {
                warn!("Connection lost: {}", e);
                break;
            }
        };

        match decode_response(frame.as_bytes()) {
            Ok(ServerMessage::Chunk(chunk)) => routes.route_chunk(chunk),
            Ok(ServerMessage::Tools { request_id, tools }) => routes.route_listing(request_id, tools),
            Ok(ServerMessage::ProtocolError { message }) => {
                warn!("Server rejected a frame: {}", message)
            }
            Err(e) => warn!("Skipping malformed frame: {}", e),
        }
    }
    routes.close();
}

async fn write_loop<W>(
    mut frames: FramedWrite<W, FrameCodec>,
    mut rx: mpsc::Receiver<ClientMessage>,
    routes: Arc<Routes>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = frames.send(message).await {
            warn!("Connection lost while sending: {}", e);
            routes.close();
            break;
        }
    }
}

// ============================================================================
// In-flight calls
// ============================================================================

/// One attempt of a call. Dropping it releases the call id and, unless the
/// call already finished, tells the server to stop.
struct InFlightCall {
    link: Arc<Link>,
    call_id: CallId,
    chunks: mpsc::UnboundedReceiver<ToolCallChunk>,
    settled: bool,
}

impl InFlightCall {
    fn open(link: Arc<Link>) -> Option<Self> {
        let call_id = CallId::new();
        let chunks = link.routes.open_call(&call_id)?;
        Some(Self {
            link,
            call_id,
            chunks,
            settled: false,
        })
    }

    async fn next_chunk(&mut self, idle_limit: Option<Duration>) -> Result<ToolCallChunk, CallError> {
        let received = match idle_limit {
            Some(limit) => timeout(limit, self.chunks.recv())
                .await
                .map_err(|_| CallError::timeout(format!("stream idle for {limit:?}")))?,
            None => self.chunks.recv().await,
        };
        received.ok_or_else(|| CallError::unreachable("connection lost mid-stream"))
    }
}

impl Drop for InFlightCall {
    fn drop(&mut self) {
        self.link.routes.release_call(&self.call_id);
        if !self.settled && !self.link.is_closed() {
            let cancel = ClientMessage::Cancel {
                call_id: self.call_id.clone(),
            };
            if self.link.outbound.try_send(cancel).is_err() {
                debug!(call_id = %self.call_id, "could not send cancel");
            }
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// A connection to one tool server plus its retry and cache state.
///
/// Sessions are not shared between agents. Within one agent, concurrent
/// calls on the same session are fine.
pub struct Session {
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    link: Mutex<Option<Arc<Link>>>,
    closed: AtomicBool,
    connects: AtomicU64,
    tools_cache: ToolListCache,
    next_request_id: AtomicU64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.connector.endpoint())
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect, retrying up to `options.max_retry_attempts` extra times.
    #[instrument(skip_all, fields(endpoint = %connector.endpoint()))]
    pub async fn connect(
        connector: Arc<dyn Connector>,
        options: ClientOptions,
    ) -> Result<Self, ConnectionError> {
        let mut session = Self {
            connector,
            options,
            link: Mutex::new(None),
            closed: AtomicBool::new(false),
            connects: AtomicU64::new(0),
            tools_cache: ToolListCache::default(),
            next_request_id: AtomicU64::new(1),
        };

        let link = session.open_link(session.options.total_attempts(), 1).await?;
        *session.link.get_mut() = Some(Arc::new(link));
        session.connects.store(1, Ordering::SeqCst);
        info!("Session established");
        Ok(session)
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of connections opened so far.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    async fn open_link(&self, attempts: u32, generation: u64) -> Result<Link, ConnectionError> {
        let mut reason = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.pause_before(attempt).await;
            }
            match timeout(self.options.request_timeout, self.connector.connect()).await {
                Ok(Ok(stream)) => {
                    return Ok(Link::spawn(stream, self.options.max_frame_bytes, generation));
                }
                Ok(Err(e)) => reason = e.to_string(),
                Err(_) => {
                    reason = format!("connect timed out after {:?}", self.options.request_timeout)
                }
            }
            warn!(
                "Connect attempt {}/{} to {} failed: {}",
                attempt,
                attempts,
                self.endpoint(),
                reason
            );
        }
        Err(ConnectionError::Unreachable {
            endpoint: self.endpoint().to_string(),
            attempts,
            reason,
        })
    }

    async fn pause_before(&self, attempt: u32) {
        let delay = self.options.backoff_for(attempt - 1);
        debug!(attempt, ?delay, "backing off before retry");
        tokio::time::sleep(delay).await;
    }

    /// The live link, reconnecting once if the previous one was lost.
    async fn live_link(&self) -> Result<Arc<Link>, ConnectionError> {
        let mut current = self.link.lock().await;
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if let Some(link) = current.as_ref().filter(|link| !link.is_closed()) {
            return Ok(Arc::clone(link));
        }

        let link = Arc::new(self.open_link(1, self.connects() + 1).await?);
        *current = Some(Arc::clone(&link));
        drop(current);
        self.reconnected().await;
        Ok(link)
    }

    async fn reconnected(&self) {
        let connects = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        info!(connects, "Reconnected to {}", self.endpoint());
        self.tools_cache.mark_stale().await;
    }

    /// Drop the current connection and open a new one.
    ///
    /// Calls in flight on the old connection fail with `Unreachable`. The
    /// cached tool list is marked stale.
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        let mut current = self.link.lock().await;
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if let Some(old) = current.take() {
            old.shutdown();
        }

        let link = self
            .open_link(self.options.total_attempts(), self.connects() + 1)
            .await?;
        *current = Some(Arc::new(link));
        drop(current);
        self.reconnected().await;
        Ok(())
    }

    /// Release the connection. Later operations fail.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(link) = self.link.lock().await.take() {
            link.shutdown();
        }
        info!("Session closed");
    }

    /// Call ids awaiting their terminal chunk.
    pub async fn in_flight(&self) -> Vec<CallId> {
        match self.link.lock().await.as_ref() {
            Some(link) => link.routes.in_flight(),
            None => Vec::new(),
        }
    }

    /// Mark the cached tool list stale; the next `list_tools` re-queries.
    pub async fn invalidate_tools_cache(&self) {
        self.tools_cache.mark_stale().await;
    }

    /// The cached tool list entry, fresh or not.
    pub async fn cached_tools(&self) -> Option<Arc<ToolListCacheEntry>> {
        self.tools_cache.snapshot().await
    }

    /// List the server's tools in registration order.
    ///
    /// With `cache_tool_list` set, a fresh cached snapshot is returned as is.
    #[instrument(skip(self))]
    pub async fn list_tools(&self) -> Result<Arc<[ToolDescriptor]>, CallError> {
        if self.options.cache_tool_list {
            if let Some(tools) = self.tools_cache.fresh().await {
                debug!("serving tool list from cache");
                return Ok(tools);
            }
        }

        let attempts = self.options.total_attempts();
        let mut last_error = CallError::unreachable("no attempt made");
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.pause_before(attempt).await;
            }
            match self.discover().await {
                Ok((tools, generation)) => return Ok(self.store_tools(tools, generation).await),
                Err(e) if e.is_retryable() && !self.is_closed() => {
                    warn!("Tool discovery attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    /// Cache a listing fetched over the link of `generation`. A listing
    /// that predates the latest reconnect is stored stale.
    async fn store_tools(&self, tools: Vec<ToolDescriptor>, generation: u64) -> Arc<[ToolDescriptor]> {
        self.tools_cache
            .store(tools, || self.connects() == generation)
            .await
    }

    /// Fetch the tool list, with the generation of the link that served it.
    async fn discover(&self) -> Result<(Vec<ToolDescriptor>, u64), CallError> {
        let link = self.live_link().await?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let reply = link
            .routes
            .open_listing(request_id)
            .ok_or_else(|| CallError::unreachable("connection closed"))?;

        let result = async {
            link.send(ClientMessage::ListTools { request_id }).await?;
            match timeout(self.options.request_timeout, reply).await {
                Ok(Ok(tools)) => Ok(tools),
                Ok(Err(_)) => Err(CallError::unreachable(
                    "connection lost before the tool list arrived",
                )),
                Err(_) => Err(CallError::timeout(format!(
                    "no tool list within {:?}",
                    self.options.request_timeout
                ))),
            }
        }
        .await;
        link.routes.release_listing(request_id);
        result.map(|tools| (tools, link.generation))
    }

    /// Call a tool and wait for its complete result.
    ///
    /// Only the send and the wait for the first chunk are retried, each
    /// attempt under a new call id. Once a chunk has arrived, any failure is
    /// final.
    #[instrument(skip(self, arguments), fields(tool = %name))]
    pub async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<ToolResult, CallError> {
        if name.trim().is_empty() {
            return Err(CallError::ToolNotFound {
                name: name.to_string(),
            });
        }

        let attempts = self.options.total_attempts();
        let mut last_error = CallError::unreachable("no attempt made");
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.pause_before(attempt).await;
            }
            if self.is_closed() {
                return Err(ConnectionError::Closed.into());
            }
            match self.start_call(name, &arguments).await {
                Ok((call, first)) => return self.finish_call(name, call, first).await,
                Err(e) => {
                    warn!("Call attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Send a fresh request and wait for its first chunk.
    async fn start_call(
        &self,
        name: &str,
        arguments: &Arguments,
    ) -> Result<(InFlightCall, ToolCallChunk), CallError> {
        let link = self.live_link().await?;
        let mut call =
            InFlightCall::open(link).ok_or_else(|| CallError::unreachable("connection closed"))?;
        debug!(call_id = %call.call_id, "sending call");

        let request = ToolCallRequest {
            call_id: call.call_id.clone(),
            tool: name.to_string(),
            arguments: arguments.clone(),
        };
        call.link.send(ClientMessage::Call(request)).await?;

        match timeout(self.options.request_timeout, call.chunks.recv()).await {
            Ok(Some(first)) => Ok((call, first)),
            Ok(None) => Err(CallError::unreachable("connection lost before the first chunk")),
            Err(_) => Err(CallError::timeout(format!(
                "no response within {:?}",
                self.options.request_timeout
            ))),
        }
    }

    /// Apply chunks until the terminal one.
    async fn finish_call(
        &self,
        name: &str,
        mut call: InFlightCall,
        first: ToolCallChunk,
    ) -> Result<ToolResult, CallError> {
        let mut reassembler = Reassembler::new(call.call_id.clone());
        let mut next = Some(first);
        loop {
            let chunk = match next.take() {
                Some(chunk) => chunk,
                None => call.next_chunk(self.options.stream_idle_timeout).await?,
            };
            match reassembler.accept(chunk) {
                Ok(Progress::Pending) => {}
                Ok(Progress::Completed(result)) => {
                    call.settled = true;
                    debug!(call_id = %call.call_id, fragments = result.fragments().len(), "call completed");
                    return Ok(result);
                }
                Ok(Progress::Failed { code, message }) => {
                    call.settled = true;
                    debug!(call_id = %call.call_id, ?code, "call failed");
                    return Err(match code {
                        ErrorCode::ToolNotFound => CallError::ToolNotFound {
                            name: name.to_string(),
                        },
                        ErrorCode::HandlerFailed | ErrorCode::InvalidRequest => {
                            CallError::HandlerError { message }
                        }
                    });
                }
                Err(e) => {
                    warn!("Protocol violation on call {}: {}", call.call_id, e);
                    return Err(CallError::unreachable(format!("protocol violation: {e}")));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolServer;
    use crate::core::config::ServerConfig;
    use crate::domains::client::CallErrorKind;
    use crate::domains::client::connector::InProcessConnector;
    use crate::domains::client::connector::testing::{
        RefusingConnector, ScriptedConnector, ScriptedPeer,
    };
    use crate::domains::tools::builtin_registry;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use tokio_test::{assert_err, assert_ok};

    fn quick() -> ClientOptions {
        ClientOptions::default()
            .with_request_timeout(Duration::from_millis(100))
            .with_retry_backoff(Duration::from_millis(10))
    }

    async fn in_process(options: ClientOptions) -> Session {
        let server = ToolServer::new(ServerConfig::default());
        let connector = Arc::new(InProcessConnector::new(server));
        assert_ok!(Session::connect(connector, options).await)
    }

    fn data(call_id: &CallId, seq: u64, value: serde_json::Value, terminal: bool) -> ServerMessage {
        ServerMessage::Chunk(ToolCallChunk::data(call_id.clone(), seq, value, terminal))
    }

    /// Answers tool listings with the built-in descriptors and counts them.
    fn listing_server(listings: Arc<AtomicU32>) -> ScriptedConnector {
        ScriptedConnector::new(move |mut peer: ScriptedPeer| {
            let listings = Arc::clone(&listings);
            async move {
                while let Some(message) = peer.recv().await {
                    if let ClientMessage::ListTools { request_id } = message {
                        listings.fetch_add(1, Ordering::SeqCst);
                        let tools = builtin_registry().descriptors();
                        peer.send(ServerMessage::Tools { request_id, tools }).await;
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_greet_end_to_end() {
        let session = in_process(ClientOptions::default()).await;
        let result = session
            .call_tool("greet", Arguments::new().with("name", "Ford"))
            .await
            .unwrap();

        assert_eq!(result.text(), Some("Hello, Ford!"));
        assert_eq!(result.fragments().len(), 1);
        assert!(session.in_flight().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let session = in_process(ClientOptions::default()).await;
        let err = session.call_tool("nope", Arguments::new()).await.unwrap_err();
        assert_eq!(
            err,
            CallError::ToolNotFound {
                name: "nope".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_handler_error_carries_message() {
        let session = in_process(ClientOptions::default()).await;
        let err = session.call_tool("greet", Arguments::new()).await.unwrap_err();
        let CallError::HandlerError { message } = err else {
            panic!("expected a handler error, got {err:?}");
        };
        assert!(message.starts_with("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_streaming_call_is_reassembled() {
        let session = in_process(ClientOptions::default()).await;
        let result = session
            .call_tool("countdown", Arguments::new().with("from", 3))
            .await
            .unwrap();
        assert_eq!(result.text(), Some("3\n2\n1\nliftoff"));
        assert_eq!(result.fragments().len(), 4);
    }

    #[tokio::test]
    async fn test_sliced_string_inside_mixed_stream_survives() {
        use crate::domains::tools::{ToolDefinition, ToolError, ToolOutput, ToolRegistry};
        use futures::stream;

        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::new("mixed", |_args: Arguments| async {
                let values = vec![Ok(json!(1)), Ok(json!("abcdefgh"))];
                Ok::<_, ToolError>(ToolOutput::stream(stream::iter(values).boxed()))
            }))
            .unwrap();
        let config = ServerConfig {
            max_chunk_bytes: 4,
            ..ServerConfig::default()
        };
        let server = ToolServer::with_registry(config, registry);
        let connector = Arc::new(InProcessConnector::new(server));
        let session = assert_ok!(Session::connect(connector, ClientOptions::default()).await);

        let result = session.call_tool("mixed", Arguments::new()).await.unwrap();
        assert_eq!(result.value(), &json!([1, "abcdefgh"]));
        assert_eq!(result.fragments().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_calls_on_one_session() {
        let session = in_process(ClientOptions::default()).await;
        let (countdown, greet) = tokio::join!(
            session.call_tool("countdown", Arguments::new().with("from", 5).with("interval_ms", 1)),
            session.call_tool("greet", Arguments::new().with("name", "Trillian")),
        );
        let countdown = countdown.unwrap();
        let greet = greet.unwrap();

        assert_eq!(countdown.text(), Some("5\n4\n3\n2\n1\nliftoff"));
        assert_eq!(greet.text(), Some("Hello, Trillian!"));
        assert_ne!(countdown.call_id(), greet.call_id());
    }

    #[tokio::test]
    async fn test_interleaved_out_of_order_chunks() {
        let connector = ScriptedConnector::new(|mut peer: ScriptedPeer| async move {
            let mut ids = HashMap::new();
            while ids.len() < 2 {
                match peer.recv().await {
                    Some(ClientMessage::Call(request)) => {
                        ids.insert(request.tool.clone(), request.call_id);
                    }
                    Some(_) => {}
                    None => return,
                }
            }
            let (a, b) = (ids["alpha"].clone(), ids["beta"].clone());
            for message in [
                data(&a, 1, json!("a1"), false),
                data(&b, 1, json!("b1"), true),
                data(&a, 0, json!("a0"), false),
                data(&b, 0, json!("b0"), false),
                data(&a, 2, json!("a2"), true),
            ] {
                peer.send(message).await;
            }
            while peer.recv().await.is_some() {}
        });

        let session = assert_ok!(Session::connect(Arc::new(connector), ClientOptions::default()).await);
        let (a, b) = tokio::join!(
            session.call_tool("alpha", Arguments::new()),
            session.call_tool("beta", Arguments::new()),
        );
        assert_eq!(a.unwrap().text(), Some("a0a1a2"));
        assert_eq!(b.unwrap().text(), Some("b0b1"));
    }

    #[tokio::test]
    async fn test_cached_tool_list_is_reused() {
        let listings = Arc::new(AtomicU32::new(0));
        let connector = Arc::new(listing_server(Arc::clone(&listings)));
        let session = assert_ok!(
            Session::connect(connector, ClientOptions::default().with_cache_tool_list(true)).await
        );

        let first = session.list_tools().await.unwrap();
        let second = session.list_tools().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(listings.load(Ordering::SeqCst), 1);
        assert_eq!(first[0].name, "greet");
    }

    #[tokio::test]
    async fn test_uncached_tool_list_requeries() {
        let listings = Arc::new(AtomicU32::new(0));
        let connector = Arc::new(listing_server(Arc::clone(&listings)));
        let session = assert_ok!(Session::connect(connector, ClientOptions::default()).await);

        let first = session.list_tools().await.unwrap();
        let second = session.list_tools().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
        assert_eq!(listings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reconnect_marks_cache_stale() {
        let listings = Arc::new(AtomicU32::new(0));
        let connector = Arc::new(listing_server(Arc::clone(&listings)));
        let options = ClientOptions::default().with_cache_tool_list(true);
        let session = assert_ok!(Session::connect(connector.clone(), options).await);

        session.list_tools().await.unwrap();
        assert_ok!(session.reconnect().await);
        assert_eq!(connector.connects(), 2);
        assert_eq!(session.connects(), 2);
        assert!(!session.cached_tools().await.unwrap().is_fresh());

        session.list_tools().await.unwrap();
        assert_eq!(listings.load(Ordering::SeqCst), 2);
        assert!(session.cached_tools().await.unwrap().is_fresh());
    }

    #[tokio::test]
    async fn test_listing_from_before_a_reconnect_is_not_cached_fresh() {
        let listings = Arc::new(AtomicU32::new(0));
        let connector = Arc::new(listing_server(Arc::clone(&listings)));
        let options = ClientOptions::default().with_cache_tool_list(true);
        let session = assert_ok!(Session::connect(connector, options).await);

        let (tools, generation) = session.discover().await.unwrap();
        assert_eq!(generation, 1);
        assert_ok!(session.reconnect().await);
        session.store_tools(tools, generation).await;

        assert!(!session.cached_tools().await.unwrap().is_fresh());
        session.list_tools().await.unwrap();
        assert_eq!(listings.load(Ordering::SeqCst), 2);
        assert!(session.cached_tools().await.unwrap().is_fresh());
    }

    #[tokio::test]
    async fn test_invalidate_tools_cache() {
        let listings = Arc::new(AtomicU32::new(0));
        let connector = Arc::new(listing_server(Arc::clone(&listings)));
        let options = ClientOptions::default().with_cache_tool_list(true);
        let session = assert_ok!(Session::connect(connector, options).await);

        session.list_tools().await.unwrap();
        session.invalidate_tools_cache().await;
        session.list_tools().await.unwrap();
        assert_eq!(listings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_retry_with_fresh_call_ids() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let cancelled = Arc::new(StdMutex::new(Vec::new()));
        let connector = {
            let (seen, cancelled) = (Arc::clone(&seen), Arc::clone(&cancelled));
            ScriptedConnector::new(move |mut peer: ScriptedPeer| {
                let (seen, cancelled) = (Arc::clone(&seen), Arc::clone(&cancelled));
                async move {
                    while let Some(message) = peer.recv().await {
                        match message {
                            ClientMessage::Call(request) => {
                                let attempt = {
                                    let mut seen = seen.lock().unwrap();
                                    seen.push(request.call_id.clone());
                                    seen.len()
                                };
                                if attempt == 3 {
                                    peer.send(data(&request.call_id, 0, json!("finally"), true)).await;
                                }
                            }
                            ClientMessage::Cancel { call_id } => cancelled.lock().unwrap().push(call_id),
                            ClientMessage::ListTools { .. } => {}
                        }
                    }
                }
            })
        };

        let options = quick().with_max_retry_attempts(2);
        let session = assert_ok!(Session::connect(Arc::new(connector), options).await);
        let result = session.call_tool("slow", Arguments::new()).await.unwrap();
        assert_eq!(result.text(), Some("finally"));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_ne!(seen[0], seen[1]);
        assert_ne!(seen[1], seen[2]);
        assert_ne!(seen[0], seen[2]);
        assert_eq!(result.call_id(), &seen[2]);
        assert_eq!(*cancelled.lock().unwrap(), seen[..2].to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_retry_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let connector = {
            let calls = Arc::clone(&calls);
            ScriptedConnector::new(move |mut peer: ScriptedPeer| {
                let calls = Arc::clone(&calls);
                async move {
                    while let Some(message) = peer.recv().await {
                        if matches!(message, ClientMessage::Call(_)) {
                            calls.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        };

        let session = assert_ok!(
            Session::connect(Arc::new(connector), quick().with_max_retry_attempts(2)).await
        );
        let err = session.call_tool("silent", Arguments::new()).await.unwrap_err();
        assert_eq!(err.kind(), CallErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_mid_stream_loss_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let connector = {
            let calls = Arc::clone(&calls);
            ScriptedConnector::new(move |mut peer: ScriptedPeer| {
                let calls = Arc::clone(&calls);
                async move {
                    while let Some(message) = peer.recv().await {
                        if let ClientMessage::Call(request) = message {
                            calls.fetch_add(1, Ordering::SeqCst);
                            peer.send(data(&request.call_id, 0, json!("partial"), false)).await;
                            return;
                        }
                    }
                }
            })
        };

        let session = assert_ok!(
            Session::connect(Arc::new(connector), quick().with_max_retry_attempts(3)).await
        );
        let err = session.call_tool("flaky", Arguments::new()).await.unwrap_err();
        assert_eq!(err.kind(), CallErrorKind::Unreachable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_idle_timeout() {
        let connector = ScriptedConnector::new(|mut peer: ScriptedPeer| async move {
            while let Some(message) = peer.recv().await {
                if let ClientMessage::Call(request) = message {
                    peer.send(data(&request.call_id, 0, json!("first"), false)).await;
                }
            }
        });

        let options = quick().with_stream_idle_timeout(Some(Duration::from_millis(500)));
        let session = assert_ok!(Session::connect(Arc::new(connector), options).await);
        let err = session.call_tool("stalls", Arguments::new()).await.unwrap_err();
        assert_eq!(err.kind(), CallErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_lost_connection_reconnects_lazily() {
        let connector = Arc::new(ScriptedConnector::new(|mut peer: ScriptedPeer| async move {
            if peer.connection == 1 {
                return;
            }
            while let Some(message) = peer.recv().await {
                if let ClientMessage::Call(request) = message {
                    peer.send(data(&request.call_id, 0, json!("second time"), true)).await;
                }
            }
        }));

        let session = assert_ok!(
            Session::connect(connector.clone(), quick().with_max_retry_attempts(1)).await
        );
        let result = session.call_tool("anything", Arguments::new()).await.unwrap();
        assert_eq!(result.text(), Some("second time"));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_budget() {
        let err = assert_err!(
            Session::connect(Arc::new(RefusingConnector), quick().with_max_retry_attempts(2)).await
        );
        assert!(matches!(
            err,
            ConnectionError::Unreachable { attempts: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_succeeds_after_refusals() {
        let connector = Arc::new(
            ScriptedConnector::new(|mut peer: ScriptedPeer| async move {
                while peer.recv().await.is_some() {}
            })
            .refusing(2),
        );
        assert_ok!(Session::connect(connector.clone(), quick().with_max_retry_attempts(2)).await);
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_dropping_a_call_cancels_it() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let connector = ScriptedConnector::new(move |mut peer: ScriptedPeer| {
            let events_tx = events_tx.clone();
            async move {
                while let Some(message) = peer.recv().await {
                    let _ = events_tx.send(message);
                }
            }
        });

        let session = Arc::new(assert_ok!(
            Session::connect(Arc::new(connector), ClientOptions::default()).await
        ));
        let task = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.call_tool("hang", Arguments::new()).await }
        });

        let Some(ClientMessage::Call(request)) = events.recv().await else {
            panic!("expected the call to reach the server");
        };
        assert_eq!(session.in_flight().await, vec![request.call_id.clone()]);

        task.abort();
        let Some(ClientMessage::Cancel { call_id }) = events.recv().await else {
            panic!("expected a cancel");
        };
        assert_eq!(call_id, request.call_id);
        assert!(session.in_flight().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let session = in_process(ClientOptions::default()).await;
        session.close().await;

        assert!(session.is_closed());
        let err = session.call_tool("greet", Arguments::new()).await.unwrap_err();
        assert_eq!(err.kind(), CallErrorKind::Unreachable);
        assert_eq!(assert_err!(session.reconnect().await), ConnectionError::Closed);
        assert!(session.in_flight().await.is_empty());
    }
}
