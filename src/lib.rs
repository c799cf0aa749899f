//! # Rias
//!
//! A [tokio](https://tokio.rs) based [Lavalink](https://lavalink.dev/) v4 cluster
//! client, independent of any Discord library.
//!
//! Rias multiplexes per-guild [`Player`]s across a cluster of Lavalink nodes,
//! keeps every node session alive across disconnects, and composes the Discord
//! voice handshake into the node's REST surface. The chat-platform gateway stays
//! outside the crate: raw voice packets come in through [`Cluster::handle_raw`]
//! and outgoing voice joins leave through the [`Gateway`] trait.

pub mod cluster;
pub mod config;
pub mod events;
pub mod filters;
pub mod model;
pub mod node;
pub mod player;
pub mod queue;
pub mod rest;
pub mod validate;

pub use cluster::{Cluster, Gateway};
pub use config::{ClusterConfig, NodeConfig, NodeSelectionStrategy};
pub use events::{ClusterEvent, NodeEvent, PlayerEvent};
pub use filters::{BassBoostLevel, FilterBuilder};
pub use model::*;
pub use node::{Node, NodeState, PluginRequest};
pub use player::{ConnectOptions, PlayInput, PlayOptions, Player};
pub use queue::{LoopMode, Queue, QueueSummary};
pub use rest::Rest;

/// Default client name, sent in the `Client-Name` handshake header and as the
/// REST user agent unless overridden by [`ClusterConfig::user_agent`].
pub const DEFAULT_CLIENT_NAME: &str = "Rias";

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
/// Errors that can occur when interacting with a Lavalink cluster.
pub enum Error {
    /// An error from [`reqwest`].
    Reqwest(reqwest::Error),

    /// An error from [`serde_json`].
    Serde(serde_json::Error),

    /// An error from [`http`].
    Http(http::Error),

    /// An error from [`tokio_tungstenite`].
    Tungstenite(tokio_tungstenite::tungstenite::Error),

    /// An error from the user-supplied [`Gateway`] implementation.
    Gateway(Box<dyn std::error::Error + Send + Sync>),

    /// The node password could not be used as a header value.
    InvalidHeaderValue(http::header::InvalidHeaderValue),

    /// A non-2xx response from the node REST API.
    Rest {
        /// The HTTP status code.
        status: u16,
        /// The error message reported by the node, if any.
        message: String,
    },

    /// A REST call exceeded its timeout.
    Timeout,

    /// The node's event stream is not connected.
    NodeNotConnected,

    /// The node is connected but has not received its session id yet.
    NodeNotReady,

    /// No connected and ready node is available for selection.
    NoAvailableNodes,

    /// There is no player for the guild, or the player was destroyed.
    PlayerNotFound,

    /// The operation requires a current track, but nothing is playing.
    NoTrackPlaying,

    /// The current track does not support seeking.
    TrackNotSeekable,

    /// Volume outside the `0..=1000` range.
    InvalidVolume(u16),

    /// A negative or out-of-bounds position.
    InvalidPosition,

    /// A filter value outside its documented range.
    InvalidFilter(&'static str),

    /// The channel id is not a 17-20 digit snowflake.
    InvalidChannel,

    /// The guild id is not a 17-20 digit snowflake.
    InvalidGuildId,

    /// The node reported a load failure for the requested identifier.
    TrackLoadFailed(Exception),

    /// The requested plugin is not installed on any usable node.
    PluginNotFound(String),

    /// The node exhausted its reconnect attempts and latched disconnected.
    MaxReconnectAttempts,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reqwest(e) => e.fmt(f),

            Self::Serde(e) => e.fmt(f),

            Self::Http(e) => e.fmt(f),

            Self::Tungstenite(e) => e.fmt(f),

            Self::Gateway(e) => write!(f, "gateway send failed: {}", e),

            Self::InvalidHeaderValue(e) => e.fmt(f),

            Self::Rest { status, message } => {
                write!(f, "Lavalink REST error ({}): {}", status, message)
            }

            Self::Timeout => write!(f, "request timed out"),

            Self::NodeNotConnected => write!(f, "node is not connected"),

            Self::NodeNotReady => write!(f, "node has no session yet"),

            Self::NoAvailableNodes => write!(f, "no available nodes"),

            Self::PlayerNotFound => write!(f, "player not found"),

            Self::NoTrackPlaying => write!(f, "no track is playing"),

            Self::TrackNotSeekable => write!(f, "current track is not seekable"),

            Self::InvalidVolume(v) => write!(f, "volume {} is outside 0..=1000", v),

            Self::InvalidPosition => write!(f, "position must be a non-negative integer"),

            Self::InvalidFilter(which) => write!(f, "invalid filter value: {}", which),

            Self::InvalidChannel => write!(f, "channel id is not a valid snowflake"),

            Self::InvalidGuildId => write!(f, "guild id is not a valid snowflake"),

            Self::TrackLoadFailed(e) => write!(
                f,
                "track load failed: {}",
                e.message.as_deref().unwrap_or(&e.cause)
            ),

            Self::PluginNotFound(name) => write!(f, "plugin {} is not installed", name),

            Self::MaxReconnectAttempts => write!(f, "maximum reconnect attempts reached"),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Reqwest(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Self::Http(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Tungstenite(e)
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeaderValue(e)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Reqwest(e) => Some(e),
            Self::Serde(e) => Some(e),
            Self::Http(e) => Some(e),
            Self::Tungstenite(e) => Some(e),
            Self::Gateway(e) => Some(e.as_ref()),
            Self::InvalidHeaderValue(e) => Some(e),
            _ => None,
        }
    }
}
