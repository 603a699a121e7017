//! Daemon Server Implementation
//!
//! Accepts framed connections on a Unix socket and drives a shared
//! [`StreamOrchestrator`]:
//! - One reader loop and one writer task per connection
//! - Chat answers are pushed back as `event` frames tagged with their session
//! - A connection that goes away cancels the generations it started
//!
//! ```text
//!                      DaemonServer
//!                           │
//!           ┌───────────────┼───────────────┐
//!           │               │               │
//!        conn-1          conn-2          conn-3
//!           │               │               │
//!           └───────────────┴───────────────┘
//!                           │
//!                  StreamOrchestrator
//!            (one generation per session)
//! ```

use std::fmt;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

use chat_conductor::{
    transport::{encode_with_limit, ClientRequest, FrameDecoder, HistoryEntry, ServerFrame},
    ChatEvent, ChatRequest, DeliveryChannel, SessionId, StreamOrchestrator, ValidationError,
};

const READ_BUFFER_SIZE: usize = 8192;

/// How long a connection closing on a framing error gets to flush its rejection
const CLOSE_GRACE: Duration = Duration::from_millis(100);

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Identifier for one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state tracking
struct ConnectionState {
    connected_at: Instant,
    peer_uid: Option<u32>,
    abort_handle: tokio::task::AbortHandle,
}

/// Configuration for the daemon server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Largest frame payload accepted or sent
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_frame_size: chat_conductor::transport::MAX_FRAME_SIZE,
        }
    }
}

/// The main daemon server
#[derive(Clone)]
pub struct DaemonServer {
    socket_path: PathBuf,
    server_config: ServerConfig,
    conductor: StreamOrchestrator,
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl DaemonServer {
    /// Create a server for `conductor` listening on `socket_path`
    pub fn new(
        socket_path: PathBuf,
        conductor: StreamOrchestrator,
        server_config: ServerConfig,
    ) -> Self {
        Self {
            socket_path,
            server_config,
            conductor,
            connection_states: Arc::new(DashMap::new()),
        }
    }

    /// Socket this server listens on
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Prepare the socket path (create directory, remove stale socket)
    fn prepare_socket(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }

        if self.socket_path.exists() {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket: {:?}", self.socket_path)
            })?;
        }

        Ok(())
    }

    /// Bind the socket with owner-only permissions
    pub fn bind(&self) -> Result<UnixListener> {
        self.prepare_socket()?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {:?}", self.socket_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.socket_path, perms).with_context(|| {
                format!("Failed to set socket permissions: {:?}", self.socket_path)
            })?;
        }

        info!(path = ?self.socket_path, "Listening for connections");
        Ok(listener)
    }

    /// Bind, serve until `shutdown` resolves, then clean up
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` resolves
    pub async fn serve(
        self,
        listener: UnixListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            let (stream, _addr) = tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            if self.connection_states.len() >= self.server_config.max_connections {
                warn!("Connection limit reached, rejecting new connection");
                drop(stream);
                continue;
            }

            let peer_uid = stream.peer_cred().ok().map(|cred| cred.uid());
            if !peer_allowed(peer_uid) {
                warn!(peer_uid = ?peer_uid, "Rejecting connection from different user");
                drop(stream);
                continue;
            }

            let conn_id = ConnectionId::next();
            info!(
                conn_id = %conn_id,
                peer_uid = ?peer_uid,
                active_connections = self.connection_states.len() + 1,
                "New connection accepted"
            );

            let connection = Connection {
                id: conn_id,
                conductor: self.conductor.clone(),
                max_frame_size: self.server_config.max_frame_size,
            };
            let connection_states = Arc::clone(&self.connection_states);
            let task = tokio::spawn(
                async move {
                    connection.handle(stream).await;
                    connection_states.remove(&conn_id);
                    info!(
                        active_connections = connection_states.len(),
                        "Connection handler finished"
                    );
                }
                .instrument(tracing::info_span!("connection", %conn_id)),
            );

            // A fast-closing connection may already have removed itself.
            if !task.is_finished() {
                self.connection_states.insert(
                    conn_id,
                    ConnectionState {
                        connected_at: Instant::now(),
                        peer_uid,
                        abort_handle: task.abort_handle(),
                    },
                );
            }
        }

        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown");

        let conn_ids: Vec<ConnectionId> = self.connection_states.iter().map(|r| *r.key()).collect();
        for conn_id in conn_ids {
            if let Some((_, state)) = self.connection_states.remove(&conn_id) {
                info!(
                    conn_id = %conn_id,
                    peer_uid = ?state.peer_uid,
                    uptime_secs = state.connected_at.elapsed().as_secs(),
                    "Aborting connection"
                );
                state.abort_handle.abort();
            }
        }

        self.conductor.shutdown();

        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket: {:?}", self.socket_path))?;
            info!(path = ?self.socket_path, "Socket file removed");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Get number of active connections
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }
}

/// Same user as the daemon, or root
fn peer_allowed(peer_uid: Option<u32>) -> bool {
    let our_uid = unsafe { libc::getuid() };
    match peer_uid {
        Some(uid) => uid == our_uid || uid == 0,
        None => true,
    }
}

/// Pushes a generation's events to the connection's writer
struct FrameDelivery {
    session: SessionId,
    out: mpsc::UnboundedSender<ServerFrame>,
}

impl FrameDelivery {
    fn send(&self, event: ChatEvent) {
        let frame = ServerFrame::Event {
            session_id: self.session.clone(),
            event,
        };
        if self.out.send(frame).is_err() {
            debug!(session = %self.session, "Connection writer gone, dropping event");
        }
    }
}

#[async_trait]
impl DeliveryChannel for FrameDelivery {
    fn on_chunk(&self, text: &str) {
        self.send(ChatEvent::chunk(text));
    }

    fn on_complete(&self) {
        self.send(ChatEvent::done());
    }

    fn on_error(&self, error: &str) {
        self.send(ChatEvent::error(error));
    }

    async fn disconnected(&self) {
        self.out.closed().await;
    }
}

struct Connection {
    id: ConnectionId,
    conductor: StreamOrchestrator,
    max_frame_size: usize,
}

impl Connection {
    async fn handle(&self, stream: UnixStream) {
        info!("Connection handler started");

        let (mut reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mut writer_task = tokio::spawn(write_frames(writer, out_rx, self.max_frame_size));

        let mut decoder = FrameDecoder::with_max_size(self.max_frame_size);
        let mut read_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut protocol_error = false;

        'read: loop {
            let n = match reader.read(&mut read_buf).await {
                Ok(0) => {
                    info!("Client disconnected (EOF)");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Read error");
                    break;
                }
            };
            decoder.push(&read_buf[..n]);

            loop {
                match decoder.decode::<ClientRequest>() {
                    Ok(Some(request)) => self.dispatch(request, &out_tx).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to decode request frame");
                        let _ = out_tx.send(ServerFrame::Rejected {
                            session_id: None,
                            error: e.to_string(),
                        });
                        protocol_error = true;
                        break 'read;
                    }
                }
            }
        }

        drop(out_tx);
        if protocol_error {
            let _ = tokio::time::timeout(CLOSE_GRACE, &mut writer_task).await;
        }
        // Dropping the writer's receiver tells in-flight generations the client is gone.
        writer_task.abort();
        debug!(conn_id = %self.id, "Connection closed");
    }

    async fn dispatch(&self, request: ClientRequest, out: &mpsc::UnboundedSender<ServerFrame>) {
        let reply = match request {
            ClientRequest::Chat { request } => self.chat(request, out),
            ClientRequest::Stop { session_id } => {
                let ack = self.conductor.cancel(&session_id);
                Some(ServerFrame::Stopped {
                    session_id,
                    ack: ack.to_string(),
                })
            }
            ClientRequest::Clear { session_id } => {
                if session_id.is_blank() {
                    Some(rejected(None, &ValidationError::MissingSessionId))
                } else {
                    self.conductor.clear(&session_id).await;
                    Some(ServerFrame::Cleared { session_id })
                }
            }
            ClientRequest::History { session_id } => {
                let messages = self
                    .conductor
                    .history(&session_id)
                    .map(|history| HistoryEntry::from_history(&history))
                    .unwrap_or_default();
                Some(ServerFrame::History {
                    session_id,
                    messages,
                })
            }
        };

        if let Some(frame) = reply {
            let _ = out.send(frame);
        }
    }

    fn chat(
        &self,
        request: ChatRequest,
        out: &mpsc::UnboundedSender<ServerFrame>,
    ) -> Option<ServerFrame> {
        let session = request.session_id.clone();
        let channel = Arc::new(FrameDelivery {
            session: session.clone(),
            out: out.clone(),
        });

        match self.conductor.start(request, channel) {
            Ok(ticket) => {
                debug!(session = %session, generation = %ticket.generation_id(), "Chat accepted");
                None
            }
            Err(err) => {
                debug!(session = %session, error = %err, "Chat rejected");
                let session = (!session.is_blank()).then_some(session);
                Some(rejected(session, &err))
            }
        }
    }
}

fn rejected(session_id: Option<SessionId>, err: &(impl fmt::Display + ?Sized)) -> ServerFrame {
    ServerFrame::Rejected {
        session_id,
        error: err.to_string(),
    }
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<ServerFrame>,
    max_frame_size: usize,
) {
    while let Some(frame) = frames.recv().await {
        match encode_with_limit(&frame, max_frame_size) {
            Ok(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    error!(error = %e, "Write error");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chat_conductor::{
        transport::encode, BackendError, ChunkStream, ConductorConfig, InferenceBackend,
        InferenceRequest, InferenceResponse, MessageRole,
    };
    use futures::{stream, StreamExt};
    use tokio::sync::oneshot;

    struct Scripted;

    #[async_trait]
    impl InferenceBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn submit(
            &self,
            _request: &InferenceRequest,
        ) -> Result<InferenceResponse, BackendError> {
            Ok(InferenceResponse {
                content: "Hi there.".to_string(),
                model: "scripted".to_string(),
                tokens_used: None,
                duration_ms: None,
            })
        }

        async fn submit_streaming(
            &self,
            request: &InferenceRequest,
        ) -> Result<ChunkStream, BackendError> {
            if request.last_question() == Some("slow") {
                return Ok(stream::pending::<Result<String, BackendError>>().boxed());
            }
            Ok(stream::iter(vec![Ok("Hi ".to_string()), Ok("there.".to_string())]).boxed())
        }
    }

    struct Harness {
        server: DaemonServer,
        _dir: tempfile::TempDir,
        _stop: oneshot::Sender<()>,
    }

    async fn start_server() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("run").join("conductor.sock");
        let conductor = StreamOrchestrator::new(Arc::new(Scripted), ConductorConfig::default());
        let server = DaemonServer::new(socket, conductor, ServerConfig::default());

        let listener = server.bind().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.clone().serve(listener, async move {
            let _ = stopped.await;
        }));

        Harness {
            server,
            _dir: dir,
            _stop: stop,
        }
    }

    struct Client {
        stream: UnixStream,
        decoder: FrameDecoder,
    }

    impl Client {
        async fn connect(path: &Path) -> Self {
            Self {
                stream: UnixStream::connect(path).await.unwrap(),
                decoder: FrameDecoder::new(),
            }
        }

        async fn send(&mut self, request: &ClientRequest) {
            self.stream.write_all(&encode(request).unwrap()).await.unwrap();
        }

        async fn recv(&mut self) -> ServerFrame {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(frame) = self.decoder.decode::<ServerFrame>().unwrap() {
                    return frame;
                }
                let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                    .await
                    .expect("timed out waiting for a frame")
                    .unwrap();
                assert!(n > 0, "daemon closed the connection");
                self.decoder.push(&buf[..n]);
            }
        }
    }

    #[test]
    fn test_connection_id_display() {
        let first = ConnectionId::next();
        let second = ConnectionId::next();
        assert_ne!(first, second);
        assert!(first.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.max_frame_size, 1024 * 1024);
    }

    #[test]
    fn test_same_user_allowed() {
        let our_uid = unsafe { libc::getuid() };
        assert!(peer_allowed(Some(our_uid)));
        assert!(peer_allowed(Some(0)));
        assert!(peer_allowed(None));
    }

    #[tokio::test]
    async fn test_socket_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let harness = start_server().await;
        let mode = fs::metadata(harness.server.socket_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_chat_streams_then_history() {
        let harness = start_server().await;
        let mut client = Client::connect(harness.server.socket_path()).await;

        client
            .send(&ClientRequest::Chat {
                request: ChatRequest::new("s1", "hello"),
            })
            .await;

        let mut content = String::new();
        loop {
            match client.recv().await {
                ServerFrame::Event { session_id, event } => {
                    assert_eq!(session_id.as_str(), "s1");
                    match event {
                        ChatEvent::Message { content: chunk } => content.push_str(&chunk),
                        ChatEvent::Done(_) => break,
                        other => panic!("unexpected event {other:?}"),
                    }
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(content, "Hi there.");

        client
            .send(&ClientRequest::History {
                session_id: "s1".into(),
            })
            .await;
        match client.recv().await {
            ServerFrame::History { messages, .. } => {
                let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
                assert_eq!(
                    roles,
                    vec![MessageRole::System, MessageRole::User, MessageRole::Assistant]
                );
                assert_eq!(messages[2].content, "Hi there.");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_unknown_session_acknowledged() {
        let harness = start_server().await;
        let mut client = Client::connect(harness.server.socket_path()).await;

        client
            .send(&ClientRequest::Stop {
                session_id: "nobody".into(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            ServerFrame::Stopped {
                session_id: "nobody".into(),
                ack: "stopped".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let harness = start_server().await;
        let mut client = Client::connect(harness.server.socket_path()).await;

        client
            .send(&ClientRequest::Chat {
                request: ChatRequest::new("s1", "   "),
            })
            .await;
        match client.recv().await {
            ServerFrame::Rejected { session_id, .. } => {
                assert_eq!(session_id, Some(SessionId::from("s1")));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(harness.server.conductor.history(&"s1".into()).is_none());
    }

    #[tokio::test]
    async fn test_clear_acknowledged() {
        let harness = start_server().await;
        let mut client = Client::connect(harness.server.socket_path()).await;

        client
            .send(&ClientRequest::Clear {
                session_id: "s1".into(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            ServerFrame::Cleared {
                session_id: "s1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_corrupt_frame_rejected() {
        let harness = start_server().await;
        let mut client = Client::connect(harness.server.socket_path()).await;

        let mut frame = encode(&ClientRequest::Stop {
            session_id: "s1".into(),
        })
        .unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        client.stream.write_all(&frame).await.unwrap();

        assert!(matches!(
            client.recv().await,
            ServerFrame::Rejected {
                session_id: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_generation() {
        let harness = start_server().await;
        let conductor = harness.server.conductor.clone();
        let mut client = Client::connect(harness.server.socket_path()).await;

        client
            .send(&ClientRequest::Chat {
                request: ChatRequest::new("s1", "slow"),
            })
            .await;
        for _ in 0..100 {
            if !conductor.active_generations().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(conductor.active_generations().len(), 1);
        assert_eq!(harness.server.connection_count(), 1);

        drop(client);
        for _ in 0..100 {
            if conductor.active_generations().is_empty() && harness.server.connection_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(conductor.active_generations().is_empty());
        assert_eq!(harness.server.connection_count(), 0);

        let history = conductor.history(&"s1".into()).unwrap();
        assert_eq!(history.last().map(|m| m.role), Some(MessageRole::User));
    }
}
