//! The cluster: node and player registries, node selection, raw-packet
//! demultiplexing and cluster-wide plugin queries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

use crate::config::{ClusterConfig, NodeSelectionStrategy};
use crate::events::{ClusterEvent, NodeEvent};
use crate::model::{LoadResult, NodeInfo, PluginMeta, VoiceServerUpdate, VoiceStateUpdate};
use crate::node::{Node, PluginRequest};
use crate::player::Player;
use crate::{validate, Error, Result};

/// Default time given to [`Cluster::shutdown`] before sockets are closed
/// regardless of pending player teardowns.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
/// Bridge to the chat-platform gateway. The cluster hands every outbound
/// voice payload (gateway opcode 4) to this trait; the host forwards it on
/// the right shard.
pub trait Gateway: Send + Sync {
    /// Deliver `payload` to the gateway connection serving `guild_id`.
    async fn send_payload(&self, guild_id: &str, payload: Value) -> Result<()>;
}

struct ClusterInner {
    config: ClusterConfig,
    user_id: StdMutex<Option<String>>,
    nodes: DashMap<String, Node>,
    players: DashMap<String, Player>,
    gateway: Arc<dyn Gateway>,
    node_tx: mpsc::UnboundedSender<ClusterEvent>,
    out_tx: mpsc::UnboundedSender<ClusterEvent>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<ClusterEvent>>,
    shutdown: AtomicBool,
}

#[derive(Clone)]
/// The cluster anchor: owns the registries and mediates between nodes,
/// players and the chat platform. Cheap to clone.
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

impl Cluster {
    /// Build the cluster and its node records. No sockets open until
    /// [`Cluster::connect`].
    pub fn new(config: ClusterConfig, gateway: Arc<dyn Gateway>) -> Result<Self> {
        let (node_tx, node_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let nodes = DashMap::new();
        for node_config in &config.nodes {
            let node = Node::new(
                node_config.clone(),
                &config.user_agent,
                config.debug,
                node_tx.clone(),
            )?;
            nodes.insert(node_config.id.clone(), node);
        }

        let inner = Arc::new(ClusterInner {
            config,
            user_id: StdMutex::new(None),
            nodes,
            players: DashMap::new(),
            gateway,
            node_tx,
            out_tx,
            receiver: AsyncMutex::new(out_rx),
            shutdown: AtomicBool::new(false),
        });

        spawn_router(Arc::downgrade(&inner), node_rx);

        Ok(Self { inner })
    }

    /// Open every node's event stream, identifying as `user_id`. Nodes that
    /// fail to open fall into their reconnect schedule; readiness arrives
    /// through [`NodeEvent::Ready`].
    pub async fn connect(&self, user_id: &str) {
        *self.inner.user_id.lock().unwrap() = Some(user_id.to_owned());

        let nodes: Vec<Node> = self.inner.nodes.iter().map(|n| n.value().clone()).collect();

        for node in nodes {
            debug!(node_id = %node.id(), "connecting node");

            if let Err(e) = node.connect(user_id).await {
                warn!(node_id = %node.id(), error = %e, "node failed to connect");
                node.schedule_reconnect();
            }
        }
    }

    /// Receive the next event from any node or player.
    pub async fn recv(&self) -> Option<ClusterEvent> {
        self.inner.receiver.lock().await.recv().await
    }

    /// The registered nodes.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.nodes.iter().map(|n| n.value().clone()).collect()
    }

    /// The node registered under `id`.
    pub fn node(&self, id: &str) -> Option<Node> {
        self.inner.nodes.get(id).map(|n| n.value().clone())
    }

    /// Register an extra node after construction. It still needs
    /// [`Node::connect`].
    pub fn add_node(&self, config: crate::config::NodeConfig) -> Result<Node> {
        let node = Node::new(
            config.clone(),
            &self.inner.config.user_agent,
            self.inner.config.debug,
            self.inner.node_tx.clone(),
        )?;

        self.inner.nodes.insert(config.id, node.clone());

        Ok(node)
    }

    /// Get or create the player for `guild_id`, selecting a node with the
    /// configured strategy. `region` is a hint for the regional strategy.
    pub fn create(&self, guild_id: &str, region: Option<&str>) -> Result<Player> {
        if !validate::is_snowflake(guild_id) {
            return Err(Error::InvalidGuildId);
        }

        match self.inner.players.entry(guild_id.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let node = self.select_node(region)?;

                debug!(guild_id, node_id = %node.id(), "creating player");

                let player = Player::new(
                    guild_id.to_owned(),
                    node,
                    self.inner.gateway.clone(),
                    self.inner.out_tx.clone(),
                );

                entry.insert(player.clone());

                Ok(player)
            }
        }
    }

    /// The player for `guild_id`, if one exists.
    pub fn get(&self, guild_id: &str) -> Option<Player> {
        self.inner.players.get(guild_id).map(|p| p.value().clone())
    }

    /// Destroy the player for `guild_id` and drop it from the registry.
    pub async fn destroy(&self, guild_id: &str) -> Result<()> {
        let Some((_, player)) = self.inner.players.remove(guild_id) else {
            return Err(Error::PlayerNotFound);
        };

        player.destroy().await;

        Ok(())
    }

    /// Destroy every player.
    pub async fn destroy_all(&self) {
        let guilds: Vec<String> = self
            .inner
            .players
            .iter()
            .map(|p| p.key().clone())
            .collect();

        join_all(guilds.iter().map(|guild_id| self.destroy(guild_id))).await;
    }

    /// Feed a raw gateway packet into the cluster. Only `VOICE_SERVER_UPDATE`
    /// and `VOICE_STATE_UPDATE` are consumed; packets for guilds without a
    /// player, or voice states of other users, are skipped.
    pub async fn handle_raw(&self, packet: &Value) {
        let Some(packet_type) = packet.get("t").and_then(Value::as_str) else {
            return;
        };

        match packet_type {
            "VOICE_SERVER_UPDATE" => {
                let Some(data) = packet.get("d") else { return };

                let update: VoiceServerUpdate = match serde_json::from_value(data.clone()) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!(error = %e, "undecodable voice server update");
                        return;
                    }
                };

                let Some(player) = self.get(&update.guild_id) else {
                    return;
                };

                if let Err(e) = player.handle_voice_server_update(update).await {
                    warn!(guild_id = %player.guild_id(), error = %e, "voice update failed");
                }
            }
            "VOICE_STATE_UPDATE" => {
                let Some(data) = packet.get("d") else { return };

                let update: VoiceStateUpdate = match serde_json::from_value(data.clone()) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!(error = %e, "undecodable voice state update");
                        return;
                    }
                };

                let Some(guild_id) = update.guild_id.clone() else {
                    return;
                };

                // Only the bot's own voice state drives the handshake.
                let user_id = self.inner.user_id.lock().unwrap().clone();
                if user_id.as_deref() != Some(update.user_id.as_str()) {
                    return;
                }

                let Some(player) = self.get(&guild_id) else {
                    return;
                };

                if let Err(e) = player.handle_voice_state_update(update).await {
                    warn!(guild_id = %guild_id, error = %e, "voice update failed");
                }
            }
            _ => {}
        }
    }

    /// Resolve an identifier or search query on the least-loaded ready node.
    /// Bare queries get the configured search source prefixed; a node-reported
    /// load error surfaces as [`Error::TrackLoadFailed`].
    pub async fn load_tracks(&self, query: &str) -> Result<LoadResult> {
        let identifier = validate::search_query(
            query,
            self.inner.config.default_search_source.as_deref(),
        );

        let eligible: Vec<Node> = self
            .inner
            .nodes
            .iter()
            .filter(|n| n.is_ready())
            .map(|n| n.value().clone())
            .collect();

        let node = min_by_load(eligible).ok_or(Error::NoAvailableNodes)?;

        match node.load_tracks(&identifier).await? {
            LoadResult::Error(exception) => Err(Error::TrackLoadFailed(exception)),
            result => Ok(result),
        }
    }

    /// Fetch info from every connected node concurrently, best-effort.
    /// Failures are logged and omitted from the result.
    pub async fn get_info(&self, force_refresh: bool) -> HashMap<String, NodeInfo> {
        let nodes: Vec<Node> = self
            .inner
            .nodes
            .iter()
            .filter(|n| n.state() == crate::node::NodeState::Connected)
            .map(|n| n.value().clone())
            .collect();

        let results = join_all(nodes.iter().map(|n| n.get_info(force_refresh))).await;

        let mut infos = HashMap::new();
        for (node, result) in nodes.iter().zip(results) {
            match result {
                Ok(info) => {
                    infos.insert(node.id().to_owned(), info);
                }
                Err(e) => warn!(node_id = %node.id(), error = %e, "info fetch failed"),
            }
        }

        infos
    }

    /// The plugins of every connected node, keyed by node id.
    pub async fn get_all_plugins(&self, force_refresh: bool) -> HashMap<String, Vec<PluginMeta>> {
        self.get_info(force_refresh)
            .await
            .into_iter()
            .map(|(node_id, info)| (node_id, info.plugins))
            .collect()
    }

    /// Plugins across the cluster, deduplicated by name. The first node to
    /// report a plugin wins.
    pub async fn get_unique_plugins(&self, force_refresh: bool) -> Vec<PluginMeta> {
        let mut seen = std::collections::HashSet::new();
        let mut plugins = Vec::new();

        for (_, node_plugins) in self.get_all_plugins(force_refresh).await {
            for plugin in node_plugins {
                if seen.insert(plugin.name.clone()) {
                    plugins.push(plugin);
                }
            }
        }

        plugins
    }

    /// Whether any node reports `name` in its cached plugin index.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.inner.nodes.iter().any(|n| n.has_plugin(name))
    }

    /// The nodes whose cached plugin index contains `name`.
    pub fn get_nodes_with_plugin(&self, name: &str) -> Vec<Node> {
        self.inner
            .nodes
            .iter()
            .filter(|n| n.has_plugin(name))
            .map(|n| n.value().clone())
            .collect()
    }

    /// Call a plugin endpoint, load-balancing across the ready nodes that
    /// carry the plugin. Refreshes the cluster's plugin caches once before
    /// giving up.
    pub async fn plugin_request(
        &self,
        name: &str,
        endpoint: &str,
        request: PluginRequest,
    ) -> Result<Option<Value>> {
        let mut candidates = self.ready_nodes_with_plugin(name);

        if candidates.is_empty() {
            self.get_info(true).await;
            candidates = self.ready_nodes_with_plugin(name);
        }

        let node = min_by_load(candidates).ok_or_else(|| Error::PluginNotFound(name.to_owned()))?;

        node.plugin_request(name, endpoint, request).await
    }

    /// Destroy every player, bounded by `timeout` (30 seconds by default),
    /// then close every node socket. Idempotent.
    pub async fn shutdown(&self, timeout: Option<Duration>) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        if tokio::time::timeout(timeout, self.destroy_all()).await.is_err() {
            warn!("shutdown timed out destroying players");
        }

        let nodes: Vec<Node> = self.inner.nodes.iter().map(|n| n.value().clone()).collect();

        for node in nodes {
            if let Err(e) = node.disconnect().await {
                warn!(node_id = %node.id(), error = %e, "disconnect failed during shutdown");
            }
        }
    }

    fn ready_nodes_with_plugin(&self, name: &str) -> Vec<Node> {
        self.inner
            .nodes
            .iter()
            .filter(|n| n.is_ready() && n.has_plugin(name))
            .map(|n| n.value().clone())
            .collect()
    }

    /// Pick a node for a new player among the connected and ready ones.
    fn select_node(&self, region: Option<&str>) -> Result<Node> {
        let eligible: Vec<Node> = self
            .inner
            .nodes
            .iter()
            .filter(|n| n.is_ready())
            .map(|n| n.value().clone())
            .collect();

        if eligible.is_empty() {
            return Err(Error::NoAvailableNodes);
        }

        if eligible.len() == 1 {
            return eligible.into_iter().next().ok_or(Error::NoAvailableNodes);
        }

        select_from(
            self.inner.config.node_selection_strategy,
            region,
            eligible,
        )
        .ok_or(Error::NoAvailableNodes)
    }
}

/// Route node events to the owning players, then republish them on the
/// outward channel. Holds only a weak handle so a dropped cluster ends the
/// task.
fn spawn_router(
    inner: Weak<ClusterInner>,
    mut node_rx: mpsc::UnboundedReceiver<ClusterEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = node_rx.recv().await {
            let Some(inner) = inner.upgrade() else { break };

            if let ClusterEvent::Node { event, .. } = &event {
                match event {
                    NodeEvent::ServerEvent(server_event) => {
                        let player = inner
                            .players
                            .get(server_event.guild_id())
                            .map(|p| p.value().clone());

                        if let Some(player) = player {
                            player.handle_server_event(server_event.clone()).await;
                        }
                    }
                    NodeEvent::PlayerUpdate { guild_id, state } => {
                        let player = inner.players.get(guild_id).map(|p| p.value().clone());

                        if let Some(player) = player {
                            player.handle_player_update(state.clone());
                        }
                    }
                    _ => {}
                }
            }

            let _ = inner.out_tx.send(event);
        }
    });
}

/// Apply a selection strategy over the eligible nodes.
pub(crate) fn select_from(
    strategy: NodeSelectionStrategy,
    region: Option<&str>,
    eligible: Vec<Node>,
) -> Option<Node> {
    match strategy {
        NodeSelectionStrategy::LoadBalanced => min_by_load(eligible),
        NodeSelectionStrategy::Regional => {
            if let Some(region) = region {
                let regional: Vec<Node> = eligible
                    .iter()
                    .filter(|n| n.config().region.as_deref() == Some(region))
                    .cloned()
                    .collect();

                if !regional.is_empty() {
                    return min_by_load(regional);
                }
            }

            min_by_load(eligible)
        }
        NodeSelectionStrategy::LeastPlayers => eligible
            .into_iter()
            .min_by_key(|n| n.stats().map(|s| s.players).unwrap_or(0)),
        NodeSelectionStrategy::LeastLoad => min_by_key_f64(eligible, |node| {
            node.stats().map(|s| s.cpu.lavalink_load).unwrap_or(0.0)
        }),
        NodeSelectionStrategy::Priority => {
            eligible.into_iter().min_by_key(|n| n.config().priority)
        }
    }
}

/// The load-balanced selection key: CPU load scaled by population.
fn load_balanced_key(node: &Node) -> f64 {
    node.stats()
        .map(|s| s.cpu.lavalink_load * (1.0 + s.players as f64 * 0.1))
        .unwrap_or(0.0)
}

fn min_by_load(nodes: Vec<Node>) -> Option<Node> {
    min_by_key_f64(nodes, load_balanced_key)
}

fn min_by_key_f64(nodes: Vec<Node>, key: impl Fn(&Node) -> f64) -> Option<Node> {
    nodes.into_iter().min_by(|a, b| {
        key(a)
            .partial_cmp(&key(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}


#[cfg(test)]
impl Cluster {
    /// Set the bot user id without opening sockets.
    pub(crate) fn force_user_id(&self, user_id: &str) {
        *self.inner.user_id.lock().unwrap() = Some(user_id.to_owned());
    }
}
