//! One session to one Lavalink node: the event stream, its reconnection
//! lifecycle, and the session-addressed REST operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use reqwest::Method;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{ClientRequestBuilder, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use crate::config::NodeConfig;
use crate::events::{ClusterEvent, NodeEvent};
use crate::model::{
    ConfigureResuming, LoadResult, Message, NodeInfo, PlayerInfo, PluginMeta, Stats, Track,
    UpdatePlayer,
};
use crate::rest::Rest;
use crate::{Error, Result};

/// A WebSocket connection to a node.
pub type NodeConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

type NodeSink = SplitSink<NodeConnection, WsMessage>;
type NodeStream = SplitStream<NodeConnection>;

/// How long a fetched node info stays fresh.
const INFO_TTL: Duration = Duration::from_secs(300);

/// Upper bound on the reconnect backoff delay, in milliseconds.
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle state of a node's event stream.
pub enum NodeState {
    /// No socket, and none being opened.
    Disconnected,
    /// A socket is being opened.
    Connecting,
    /// The event stream is live.
    Connected,
    /// The socket dropped and a reconnect is pending.
    Reconnecting,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Disconnected => write!(f, "disconnected"),
            NodeState::Connecting => write!(f, "connecting"),
            NodeState::Connected => write!(f, "connected"),
            NodeState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

#[derive(Debug, Clone)]
/// Options for [`Node::plugin_request`].
pub struct PluginRequest {
    /// The HTTP method, GET by default.
    pub method: Method,
    /// An optional JSON body.
    pub body: Option<Value>,
}

impl Default for PluginRequest {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
        }
    }
}

/// Mutable session state, guarded by one lock.
#[derive(Debug)]
struct NodeSession {
    state: NodeState,
    session_id: Option<String>,
    reconnect_attempts: u32,
    stats: Option<Stats>,
    info: Option<NodeInfo>,
    info_fetched_at: Option<Instant>,
    plugins: HashMap<String, PluginMeta>,
}

#[derive(Debug)]
struct NodeInner {
    config: NodeConfig,
    client_name: String,
    debug: bool,
    rest: Rest,
    user_id: StdMutex<Option<String>>,
    session: StdMutex<NodeSession>,
    sink: AsyncMutex<Option<NodeSink>>,
    reconnect_task: StdMutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
    events: mpsc::UnboundedSender<ClusterEvent>,
}

#[derive(Debug, Clone)]
/// A handle to one node session. Clones share the same record, so the read
/// task, the reconnect timer and REST callers all observe one state.
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node record. No socket is opened until [`Node::connect`].
    pub fn new(
        config: NodeConfig,
        user_agent: &str,
        debug: bool,
        events: mpsc::UnboundedSender<ClusterEvent>,
    ) -> Result<Self> {
        let rest = Rest::new(&config, user_agent)?;

        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                client_name: user_agent.to_owned(),
                debug,
                rest,
                user_id: StdMutex::new(None),
                session: StdMutex::new(NodeSession {
                    state: NodeState::Disconnected,
                    session_id: None,
                    reconnect_attempts: 0,
                    stats: None,
                    info: None,
                    info_fetched_at: None,
                    plugins: HashMap::new(),
                }),
                sink: AsyncMutex::new(None),
                reconnect_task: StdMutex::new(None),
                closing: AtomicBool::new(false),
                events,
            }),
        })
    }

    /// The node's identifier.
    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    /// The node's configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// The REST client of this node.
    pub fn rest(&self) -> &Rest {
        &self.inner.rest
    }

    /// The current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.inner.session.lock().unwrap().state
    }

    /// The session id, if one was issued.
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().unwrap().session_id.clone()
    }

    /// The most recent statistics pushed by the node.
    pub fn stats(&self) -> Option<Stats> {
        self.inner.session.lock().unwrap().stats.clone()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.session.lock().unwrap().reconnect_attempts
    }

    /// Whether the node can take session-addressed REST commands.
    pub fn is_ready(&self) -> bool {
        let session = self.inner.session.lock().unwrap();
        session.state == NodeState::Connected && session.session_id.is_some()
    }

    /// The cached plugin index.
    pub fn plugins(&self) -> Vec<PluginMeta> {
        self.inner
            .session
            .lock()
            .unwrap()
            .plugins
            .values()
            .cloned()
            .collect()
    }

    /// Whether the cached plugin index contains `name`.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.inner.session.lock().unwrap().plugins.contains_key(name)
    }

    /// Open the event stream, identifying as `user_id`. Returns once the
    /// socket is open; readiness arrives with the `ready` frame, observable
    /// through [`NodeEvent::Ready`].
    pub async fn connect(&self, user_id: &str) -> Result<()> {
        {
            let session = self.inner.session.lock().unwrap();
            if matches!(
                session.state,
                NodeState::Connecting | NodeState::Connected
            ) {
                return Ok(());
            }
        }

        *self.inner.user_id.lock().unwrap() = Some(user_id.to_owned());
        self.inner.closing.store(false, Ordering::SeqCst);
        self.cancel_reconnect();
        self.set_state(NodeState::Connecting);

        match self.open_socket().await {
            Ok(connection) => {
                self.install(connection).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(NodeState::Disconnected);
                Err(e)
            }
        }
    }

    /// Close the event stream with code 1000 and cancel any pending
    /// reconnect. The session id survives only when a resume key is
    /// configured.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.cancel_reconnect();

        let mut sink = self.inner.sink.lock().await;

        if let Some(sink) = sink.as_mut() {
            sink.send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await
            .map_err(Error::from)?;
        } else {
            drop(sink);

            let mut session = self.inner.session.lock().unwrap();
            session.state = NodeState::Disconnected;
            if self.inner.config.resume_key.is_none() {
                session.session_id = None;
            }
        }

        Ok(())
    }

    /// Update the player of `guild_id` on this node.
    pub async fn update_player(
        &self,
        guild_id: &str,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<PlayerInfo> {
        let session_id = self.require_session()?;

        self.inner
            .rest
            .update_player(&session_id, guild_id, update, no_replace)
            .await
            .inspect_err(|e| self.log_rest_error("update_player", e))
    }

    /// Destroy the player of `guild_id` on this node. A missing player counts
    /// as success.
    pub async fn destroy_player(&self, guild_id: &str) -> Result<()> {
        let session_id = self.require_session()?;

        self.inner
            .rest
            .destroy_player(&session_id, guild_id)
            .await
            .inspect_err(|e| self.log_rest_error("destroy_player", e))
    }

    /// Resolve an identifier into tracks.
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        self.require_session()?;

        self.inner
            .rest
            .load_tracks(identifier)
            .await
            .inspect_err(|e| self.log_rest_error("load_tracks", e))
    }

    /// Decode one encoded track blob.
    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        self.require_session()?;

        self.inner
            .rest
            .decode_track(encoded)
            .await
            .inspect_err(|e| self.log_rest_error("decode_track", e))
    }

    /// Decode a batch of encoded track blobs.
    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        self.require_session()?;

        self.inner
            .rest
            .decode_tracks(encoded)
            .await
            .inspect_err(|e| self.log_rest_error("decode_tracks", e))
    }

    /// The node's static information, served from a cache with a 300 second
    /// lifetime unless `force_refresh` is set. A refresh rebuilds the plugin
    /// index and emits [`NodeEvent::InfoUpdate`] plus one
    /// [`NodeEvent::PluginLoaded`] per plugin.
    pub async fn get_info(&self, force_refresh: bool) -> Result<NodeInfo> {
        {
            let session = self.inner.session.lock().unwrap();

            if session.state != NodeState::Connected {
                return Err(Error::NodeNotConnected);
            }

            if !force_refresh {
                if let (Some(info), Some(fetched_at)) = (&session.info, session.info_fetched_at)
                {
                    if fetched_at.elapsed() < INFO_TTL {
                        return Ok(info.clone());
                    }
                }
            }
        }

        let info = self
            .inner
            .rest
            .info()
            .await
            .inspect_err(|e| self.log_rest_error("info", e))?;

        {
            let mut session = self.inner.session.lock().unwrap();
            session.plugins = info
                .plugins
                .iter()
                .map(|p| (p.name.clone(), p.clone()))
                .collect();
            session.info = Some(info.clone());
            session.info_fetched_at = Some(Instant::now());
        }

        self.emit(NodeEvent::InfoUpdate(info.clone()));
        for plugin in &info.plugins {
            self.emit(NodeEvent::PluginLoaded(plugin.clone()));
        }

        Ok(info)
    }

    /// Call a plugin endpoint on this node, verifying first that the plugin
    /// is installed. Returns the parsed body when the node answers with JSON.
    pub async fn plugin_request(
        &self,
        name: &str,
        endpoint: &str,
        request: PluginRequest,
    ) -> Result<Option<Value>> {
        if self.plugins().is_empty() {
            self.get_info(true).await?;
        }

        if !self.has_plugin(name) {
            return Err(Error::PluginNotFound(name.to_owned()));
        }

        let path = if endpoint.starts_with('/') {
            endpoint.to_owned()
        } else {
            format!("/{}", endpoint)
        };

        self.inner
            .rest
            .request(request.method, &path, request.body)
            .await
            .inspect_err(|e| self.log_rest_error("plugin_request", e))
    }

    /// Open a socket with the handshake headers, attaching `Session-Id` when
    /// a resumable session is known.
    async fn open_socket(&self) -> Result<NodeConnection> {
        let user_id = self
            .inner
            .user_id
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::NodeNotConnected)?;

        let mut request = ClientRequestBuilder::new(self.inner.rest.websocket_uri().clone())
            .with_header("Authorization", self.inner.rest.password())
            .with_header("User-Id", &user_id)
            .with_header("Client-Name", &self.inner.client_name);

        if self.inner.config.resume_key.is_some() {
            if let Some(session_id) = self.session_id() {
                request = request.with_header("Session-Id", &session_id);
            }
        }

        let (connection, _) = connect_async(request).await.map_err(Error::from)?;

        Ok(connection)
    }

    /// Take ownership of an open socket: mark connected, reset the attempt
    /// counter, configure resuming, kick off plugin discovery and spawn the
    /// read task.
    async fn install(&self, connection: NodeConnection) {
        let (sink, stream) = connection.split();
        *self.inner.sink.lock().await = Some(sink);

        {
            let mut session = self.inner.session.lock().unwrap();
            session.state = NodeState::Connected;
            session.reconnect_attempts = 0;
        }

        debug!(node_id = %self.id(), "event stream open");
        self.emit(NodeEvent::Connect);

        if let Some(key) = &self.inner.config.resume_key {
            self.configure_resuming(key.clone()).await;
        }

        let node = self.clone();
        tokio::spawn(async move {
            if let Err(e) = node.get_info(true).await {
                warn!(node_id = %node.id(), error = %e, "plugin discovery failed");
                node.emit(NodeEvent::Error(Arc::new(e)));
            }
        });

        let node = self.clone();
        tokio::spawn(async move {
            node.read_loop(stream).await;
        });
    }

    /// Send the `configureResuming` frame.
    async fn configure_resuming(&self, key: String) {
        let frame = ConfigureResuming {
            op: "configureResuming",
            key: &key,
            timeout: self.inner.config.resume_timeout,
        };

        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(node_id = %self.id(), error = %e, "failed to encode configureResuming");
                return;
            }
        };

        if let Some(sink) = self.inner.sink.lock().await.as_mut() {
            if let Err(e) = sink.send(WsMessage::text(text)).await {
                warn!(node_id = %self.id(), error = %e, "failed to configure resuming");
                self.emit(NodeEvent::Error(Arc::new(Error::Tungstenite(e))));
            }
        }
    }

    /// Drain the event stream until it closes, then run the close transition.
    async fn read_loop(&self, mut stream: NodeStream) {
        let mut close: Option<(u16, String)> = None;

        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Close(frame)) => {
                    close = frame.map(|f| (u16::from(f.code), f.reason.as_str().to_owned()));
                    break;
                }
                Ok(message) if message.is_text() || message.is_binary() => {
                    self.dispatch_frame(&message.into_data());
                }
                Ok(_) => {}
                Err(e) => {
                    // A transport error alone does not end the session.
                    error!(node_id = %self.id(), error = %e, "event stream error");
                    self.emit(NodeEvent::Error(Arc::new(Error::Tungstenite(e))));
                }
            }
        }

        self.handle_close(close).await;
    }

    /// Decode one inbound frame and dispatch it by opcode.
    fn dispatch_frame(&self, data: &[u8]) {
        let value: Value = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(e) => {
                warn!(node_id = %self.id(), error = %e, "undecodable frame");
                self.emit(NodeEvent::Error(Arc::new(Error::Serde(e))));
                return;
            }
        };

        if self.inner.debug {
            debug!(node_id = %self.id(), frame = %value, "inbound frame");
        }

        let op = value.get("op").and_then(Value::as_str).unwrap_or_default();

        match op {
            "ready" | "playerUpdate" | "stats" | "event" => {
                match serde_json::from_value::<Message>(value) {
                    Ok(message) => self.handle_message(message),
                    Err(e) => {
                        warn!(node_id = %self.id(), error = %e, "frame failed to decode");
                        self.emit(NodeEvent::Error(Arc::new(Error::Serde(e))));
                    }
                }
            }
            _ => self.emit(NodeEvent::Raw(value)),
        }
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::Ready {
                resumed,
                session_id,
            } => {
                self.inner.session.lock().unwrap().session_id = Some(session_id.clone());

                debug!(node_id = %self.id(), session_id = %session_id, resumed, "session ready");
                self.emit(NodeEvent::Ready {
                    session_id,
                    resumed,
                });
            }
            Message::Stats(stats) => {
                self.inner.session.lock().unwrap().stats = Some(stats.clone());
                self.emit(NodeEvent::Stats(stats));
            }
            Message::Event(event) => self.emit(NodeEvent::ServerEvent(event)),
            Message::PlayerUpdate { guild_id, state } => {
                self.emit(NodeEvent::PlayerUpdate { guild_id, state });
            }
        }
    }

    /// Run the state transition for a closed socket and schedule a reconnect
    /// for abnormal closures.
    async fn handle_close(&self, close: Option<(u16, String)>) {
        *self.inner.sink.lock().await = None;

        let code = close.as_ref().map(|(code, _)| *code);
        let reason = close.map(|(_, reason)| reason);

        let intentional = self.inner.closing.load(Ordering::SeqCst);

        if intentional || code == Some(1000) {
            {
                let mut session = self.inner.session.lock().unwrap();
                session.state = NodeState::Disconnected;
                if self.inner.config.resume_key.is_none() {
                    session.session_id = None;
                }
            }

            debug!(node_id = %self.id(), code, "event stream closed");
            self.emit(NodeEvent::Disconnect { code, reason });
        } else {
            self.set_state(NodeState::Reconnecting);

            warn!(node_id = %self.id(), code, "event stream lost, reconnecting");
            self.emit(NodeEvent::Disconnect { code, reason });
            self.schedule_reconnect();
        }
    }

    /// Spawn the backoff timer that re-opens the socket, giving up after the
    /// configured number of attempts.
    pub(crate) fn schedule_reconnect(&self) {
        self.set_state(NodeState::Reconnecting);

        let node = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                let attempt = {
                    let mut session = node.inner.session.lock().unwrap();
                    session.reconnect_attempts += 1;
                    session.reconnect_attempts
                };

                if attempt > node.inner.config.max_reconnect_attempts {
                    node.set_state(NodeState::Disconnected);
                    error!(
                        node_id = %node.id(),
                        attempts = attempt - 1,
                        "reconnect attempts exhausted"
                    );
                    node.emit(NodeEvent::Error(Arc::new(Error::MaxReconnectAttempts)));
                    break;
                }

                let delay = backoff_delay(node.inner.config.reconnect_delay, attempt);
                node.emit(NodeEvent::Reconnecting { attempt, delay });

                sleep(delay).await;

                if node.inner.closing.load(Ordering::SeqCst) {
                    break;
                }

                node.set_state(NodeState::Connecting);

                match node.open_socket().await {
                    Ok(connection) => {
                        node.install(connection).await;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            node_id = %node.id(),
                            attempt,
                            error = %e,
                            "reconnect attempt failed"
                        );
                        node.emit(NodeEvent::Error(Arc::new(e)));
                        node.set_state(NodeState::Reconnecting);
                    }
                }
            }
        });

        let previous = self.inner.reconnect_task.lock().unwrap().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.inner.reconnect_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn set_state(&self, state: NodeState) {
        self.inner.session.lock().unwrap().state = state;
    }

    /// The session id, or the readiness error for session-addressed calls.
    fn require_session(&self) -> Result<String> {
        let session = self.inner.session.lock().unwrap();

        if session.state != NodeState::Connected {
            return Err(Error::NodeNotConnected);
        }

        session.session_id.clone().ok_or(Error::NodeNotReady)
    }

    fn log_rest_error(&self, operation: &str, error: &Error) {
        error!(node_id = %self.id(), operation, error = %error, "REST call failed");
    }

    fn emit(&self, event: NodeEvent) {
        let _ = self.inner.events.send(ClusterEvent::Node {
            node_id: self.inner.config.id.clone(),
            event,
        });
    }
}

/// The delay before reconnect attempt `attempt`, starting at 1: exponential
/// in the base delay plus up to a second of jitter, capped at 30 seconds.
pub(crate) fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let exponential = base_ms.saturating_mul(1u64 << exponent);
    let jitter = rand::rng().random_range(0..1000u64);

    Duration::from_millis(exponential.saturating_add(jitter).min(MAX_RECONNECT_DELAY_MS))
}

#[cfg(test)]
impl Node {
    /// Force the session into a ready state without a socket.
    pub(crate) fn force_ready(&self, session_id: &str) {
        let mut session = self.inner.session.lock().unwrap();
        session.state = NodeState::Connected;
        session.session_id = Some(session_id.to_owned());
    }

    /// Force the session into a state without touching the session id.
    pub(crate) fn force_state(&self, state: NodeState) {
        self.set_state(state);
    }

    /// Inject statistics.
    pub(crate) fn force_stats(&self, stats: Stats) {
        self.inner.session.lock().unwrap().stats = Some(stats);
    }

    /// Inject a plugin index.
    pub(crate) fn force_plugins(&self, plugins: Vec<PluginMeta>) {
        self.inner.session.lock().unwrap().plugins = plugins
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
    }

    /// Publish an event as if it came from the read task.
    pub(crate) fn emit_for_test(&self, event: NodeEvent) {
        self.emit(event);
    }
}
