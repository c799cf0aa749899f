//! Cluster and node configuration.

use serde::Deserialize;

use crate::DEFAULT_CLIENT_NAME;

/// Default session resume timeout, in seconds.
pub const DEFAULT_RESUME_TIMEOUT: u32 = 60;

/// Default number of reconnect attempts before a node latches disconnected.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base reconnect delay, in milliseconds.
pub const DEFAULT_RECONNECT_DELAY: u64 = 3000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Connection settings for a single Lavalink node.
pub struct NodeConfig {
    /// Unique identifier of the node inside the cluster.
    pub id: String,

    /// Hostname or address of the node.
    pub host: String,

    /// Port of the node.
    pub port: u16,

    /// Shared password, sent in the `Authorization` header on both transports.
    pub password: String,

    #[serde(default)]
    /// Whether to use TLS (`wss`/`https`).
    pub secure: bool,

    #[serde(default)]
    /// Voice region served by this node, used by the regional selection strategy.
    pub region: Option<String>,

    #[serde(default)]
    /// Selection priority. Lower values win under the priority strategy.
    pub priority: i32,

    #[serde(default)]
    /// Resume key. When set, the session id survives disconnects and the next
    /// socket reclaims it within [`NodeConfig::resume_timeout`].
    pub resume_key: Option<String>,

    #[serde(default = "default_resume_timeout")]
    /// Resume timeout in seconds.
    pub resume_timeout: u32,

    #[serde(default = "default_max_reconnect_attempts")]
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_delay")]
    /// Base reconnect delay in milliseconds, doubled on each attempt.
    pub reconnect_delay: u64,
}

impl NodeConfig {
    /// Create a node configuration with default resume and reconnect settings.
    pub fn new(id: &str, host: &str, port: u16, password: &str) -> Self {
        Self {
            id: id.to_owned(),
            host: host.to_owned(),
            port,
            password: password.to_owned(),
            secure: false,
            region: None,
            priority: 0,
            resume_key: None,
            resume_timeout: DEFAULT_RESUME_TIMEOUT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// The `host:port` authority of this node.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_resume_timeout() -> u32 {
    DEFAULT_RESUME_TIMEOUT
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay() -> u64 {
    DEFAULT_RECONNECT_DELAY
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Strategy used to pick a node for a new player.
pub enum NodeSelectionStrategy {
    #[default]
    /// Lowest `lavalinkLoad * (1 + players * 0.1)`.
    LoadBalanced,

    /// Prefer nodes matching the requested region, falling back to
    /// [`NodeSelectionStrategy::LoadBalanced`] over all eligible nodes.
    Regional,

    /// Fewest players.
    LeastPlayers,

    /// Lowest `lavalinkLoad`.
    LeastLoad,

    /// Lowest configured priority value.
    Priority,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Settings for the whole cluster.
pub struct ClusterConfig {
    /// The nodes to connect to.
    pub nodes: Vec<NodeConfig>,

    #[serde(default = "default_user_agent")]
    /// Client name sent in the `Client-Name` header and REST user agent.
    pub user_agent: String,

    #[serde(default)]
    /// Search source prefixed to bare queries, e.g. `scsearch`. Defaults to
    /// `ytsearch` when unset.
    pub default_search_source: Option<String>,

    #[serde(default)]
    /// Node selection strategy, fixed at construction.
    pub node_selection_strategy: NodeSelectionStrategy,

    #[serde(default)]
    /// Log every inbound frame at debug level.
    pub debug: bool,
}

impl ClusterConfig {
    /// Create a configuration for the given nodes with default settings.
    pub fn new(nodes: Vec<NodeConfig>) -> Self {
        Self {
            nodes,
            user_agent: DEFAULT_CLIENT_NAME.to_owned(),
            default_search_source: None,
            node_selection_strategy: NodeSelectionStrategy::default(),
            debug: false,
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_CLIENT_NAME.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_config_defaults_from_json() {
        let config: NodeConfig = serde_json::from_str(
            r#"{"id": "main", "host": "localhost", "port": 2333, "password": "youshallnotpass"}"#,
        )
        .expect("minimal node config");

        assert!(!config.secure);
        assert_eq!(config.priority, 0);
        assert_eq!(config.resume_timeout, 60);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, 3000);
        assert_eq!(config.authority(), "localhost:2333");
    }

    #[test]
    fn strategy_parses_kebab_case() {
        let strategy: NodeSelectionStrategy =
            serde_json::from_str(r#""least-players""#).expect("strategy name");

        assert_eq!(strategy, NodeSelectionStrategy::LeastPlayers);
    }

    #[test]
    fn cluster_config_defaults() {
        let config = ClusterConfig::new(vec![NodeConfig::new("main", "localhost", 2333, "pass")]);

        assert_eq!(config.user_agent, "Rias");
        assert_eq!(
            config.node_selection_strategy,
            NodeSelectionStrategy::LoadBalanced
        );
        assert!(!config.debug);
    }
}
