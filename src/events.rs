//! Tagged-union events published by nodes and players.
//!
//! Every component pushes into one cluster-wide channel; the bot drains it
//! through [`crate::Cluster::recv`]. There is no handler registry: matching on
//! the event enum replaces per-event subscriptions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::model::{
    Exception, NodeInfo, PlayerState, PluginMeta, ServerEvent, Stats, Track, TrackEndReason,
};
use crate::Error;

#[derive(Debug, Clone)]
/// An event scoped to one node session.
pub enum NodeEvent {
    /// The socket opened and the session entered the connected state.
    Connect,

    /// The node issued (or restored) a session id.
    Ready {
        /// The session id addressing REST player commands.
        session_id: String,
        /// Whether a previous session was resumed.
        resumed: bool,
    },

    /// The socket closed.
    Disconnect {
        /// The close code, when one was received.
        code: Option<u16>,
        /// The close reason, when one was received.
        reason: Option<String>,
    },

    /// A reconnect attempt was scheduled.
    Reconnecting {
        /// The attempt number, starting at 1.
        attempt: u32,
        /// The backoff delay before the attempt.
        delay: Duration,
    },

    /// Fresh node statistics arrived.
    Stats(Stats),

    /// A guild-scoped event frame arrived. The cluster routes it to the owning
    /// player before publishing it.
    ServerEvent(ServerEvent),

    /// A player state snapshot arrived.
    PlayerUpdate {
        /// The guild whose player this describes.
        guild_id: String,
        /// The reported state.
        state: PlayerState,
    },

    /// The node info cache was refreshed.
    InfoUpdate(NodeInfo),

    /// A plugin was discovered during info refresh.
    PluginLoaded(PluginMeta),

    /// A frame with an unknown opcode arrived.
    Raw(Value),

    /// A background failure: transport error, failed plugin discovery, or the
    /// terminal reconnect give-up.
    Error(Arc<Error>),
}

#[derive(Debug, Clone)]
/// An event scoped to one guild's player.
pub enum PlayerEvent {
    /// A track started playing.
    TrackStart(Track),

    /// A track stopped playing.
    TrackEnd {
        /// The track that ended.
        track: Track,
        /// Why it ended.
        reason: TrackEndReason,
    },

    /// A track got stuck.
    TrackStuck {
        /// The stuck track.
        track: Track,
        /// The exceeded threshold in milliseconds.
        threshold_ms: u64,
    },

    /// A track threw an exception.
    TrackException {
        /// The failing track.
        track: Track,
        /// The exception.
        exception: Exception,
    },

    /// The node's voice socket for this guild closed.
    WebSocketClosed {
        /// The voice close code.
        code: u32,
        /// The close reason.
        reason: String,
        /// Whether the remote side closed it.
        by_remote: bool,
    },

    /// The node pushed a state snapshot.
    PlayerUpdate(PlayerState),

    /// Tracks were added to the queue.
    QueueAdd {
        /// How many tracks were added.
        count: usize,
    },

    /// A track was removed from the queue.
    QueueRemove(Track),

    /// The queue was cleared.
    QueueClear,

    /// The queue was shuffled.
    QueueShuffle,

    /// The queue ran out of tracks.
    QueueEnd,

    /// The player was destroyed.
    Destroy,
}

#[derive(Debug, Clone)]
/// Any event emitted by the cluster.
pub enum ClusterEvent {
    /// A node-scoped event.
    Node {
        /// The node that emitted it.
        node_id: String,
        /// The event.
        event: NodeEvent,
    },

    /// A player-scoped event.
    Player {
        /// The guild whose player emitted it.
        guild_id: String,
        /// The event.
        event: PlayerEvent,
    },
}
