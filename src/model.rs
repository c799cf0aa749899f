//! Serde models for the Lavalink v4 WebSocket and REST protocol, plus the two
//! raw gateway packets the cluster consumes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
/// A frame pushed by the node over the event stream.
pub enum Message {
    #[serde(rename_all = "camelCase")]
    /// First frame of a session. Carries the session id used to address all
    /// REST player commands.
    Ready {
        /// Whether this session resumed a previous one.
        resumed: bool,
        /// The session id issued by the node.
        session_id: String,
    },

    #[serde(rename_all = "camelCase")]
    /// Periodic state snapshot for one player.
    PlayerUpdate {
        /// The guild whose player this describes.
        guild_id: String,
        /// The reported state.
        state: PlayerState,
    },

    /// Periodic node statistics.
    Stats(Stats),

    /// A player or voice event.
    Event(ServerEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Node-reported player state.
pub struct PlayerState {
    /// Unix timestamp in milliseconds.
    pub time: u64,
    /// Track position in milliseconds.
    pub position: u64,
    /// Whether the node is connected to the voice gateway.
    pub connected: bool,
    /// Node-to-voice-gateway ping in milliseconds, `-1` when not connected.
    pub ping: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Node statistics, pushed once per minute.
pub struct Stats {
    /// Players registered on the node.
    pub players: u32,
    /// Players currently playing a track.
    pub playing_players: u32,
    /// Node uptime in milliseconds.
    pub uptime: u64,
    /// Memory statistics.
    pub memory: MemoryStats,
    /// CPU statistics.
    pub cpu: CpuStats,
    /// Frame statistics. Absent when the node has no players.
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Memory statistics of a node.
pub struct MemoryStats {
    /// Free memory in bytes.
    pub free: u64,
    /// Used memory in bytes.
    pub used: u64,
    /// Allocated memory in bytes.
    pub allocated: u64,
    /// Reservable memory in bytes.
    pub reservable: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// CPU statistics of a node.
pub struct CpuStats {
    /// Core count.
    pub cores: u16,
    /// System load.
    pub system_load: f64,
    /// Load attributable to the node process.
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Frame statistics of a node.
pub struct FrameStats {
    /// Frames sent to the voice gateway.
    pub sent: u32,
    /// Frames nulled.
    pub nulled: u32,
    /// Difference between sent and expected frames.
    pub deficit: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
/// A guild-scoped event pushed by the node.
pub enum ServerEvent {
    #[serde(rename_all = "camelCase", rename = "TrackStartEvent")]
    /// A track started playing.
    TrackStart {
        /// The guild id.
        guild_id: String,
        /// The track that started.
        track: Track,
    },

    #[serde(rename_all = "camelCase", rename = "TrackEndEvent")]
    /// A track stopped playing.
    TrackEnd {
        /// The guild id.
        guild_id: String,
        /// The track that ended.
        track: Track,
        /// Why it ended.
        reason: TrackEndReason,
    },

    #[serde(rename_all = "camelCase", rename = "TrackStuckEvent")]
    /// A track got stuck while playing.
    TrackStuck {
        /// The guild id.
        guild_id: String,
        /// The stuck track.
        track: Track,
        /// The exceeded threshold in milliseconds.
        threshold_ms: u64,
    },

    #[serde(rename_all = "camelCase", rename = "TrackExceptionEvent")]
    /// A track threw an exception.
    TrackException {
        /// The guild id.
        guild_id: String,
        /// The failing track.
        track: Track,
        /// The exception.
        exception: Exception,
    },

    #[serde(rename_all = "camelCase", rename = "WebSocketClosedEvent")]
    /// The node's voice socket to the platform closed.
    WebSocketClosed {
        /// The guild id.
        guild_id: String,
        /// The voice close code.
        code: u32,
        /// The close reason.
        reason: String,
        /// Whether the remote side closed the connection.
        by_remote: bool,
    },
}

impl ServerEvent {
    /// The guild this event belongs to.
    pub fn guild_id(&self) -> &str {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. } => guild_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// An immutable track descriptor. Only [`Track::encoded`] is required to play.
pub struct Track {
    /// The base64 encoded track data.
    pub encoded: String,

    /// Track metadata.
    pub info: TrackInfo,

    #[serde(default)]
    /// Extra metadata supplied by plugins.
    pub plugin_info: HashMap<String, Value>,

    #[serde(default)]
    /// User data echoed back by the node.
    pub user_data: HashMap<String, Value>,
}

/// Tracks are value objects; deduplication compares identifiers.
impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.info.identifier == other.info.identifier
    }
}

impl Eq for Track {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Metadata of a track.
pub struct TrackInfo {
    /// Source-scoped identifier.
    pub identifier: String,
    /// Whether the track supports seeking.
    pub is_seekable: bool,
    /// The author.
    pub author: String,
    /// Length in milliseconds.
    pub length: u64,
    /// Whether the track is a live stream.
    pub is_stream: bool,
    /// Starting position in milliseconds.
    pub position: u64,
    /// The title.
    pub title: String,
    /// The source URL, if any.
    pub uri: Option<String>,
    /// The artwork URL, if any.
    pub artwork_url: Option<String>,
    /// The ISRC, if known.
    pub isrc: Option<String>,
    /// The source manager that resolved the track.
    pub source_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Why a track stopped playing.
pub enum TrackEndReason {
    /// Playback finished. The next track may start.
    Finished,
    /// The track failed to load. The next track may start.
    LoadFailed,
    /// The track was stopped.
    Stopped,
    /// The track was replaced by another one.
    Replaced,
    /// The player was cleaned up.
    Cleanup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// An exception reported by the node.
pub struct Exception {
    /// Human-readable message, if any.
    pub message: Option<String>,
    /// How alarming the failure is.
    pub severity: Severity,
    /// The underlying cause.
    pub cause: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Severity of an [`Exception`].
pub enum Severity {
    /// Expected failure, e.g. an unavailable video.
    Common,
    /// Possibly caused by an outside service misbehaving.
    Suspicious,
    /// A fault in the node or an unknown cause.
    Fault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "loadType", content = "data")]
/// Result of a `/v4/loadtracks` call.
pub enum LoadResult {
    /// A single track was resolved.
    Track(Box<Track>),

    /// A playlist was resolved.
    Playlist {
        /// Playlist metadata.
        info: PlaylistInfo,

        #[serde(default)]
        /// Extra metadata supplied by plugins.
        plugin_info: HashMap<String, Value>,

        /// The playlist tracks.
        tracks: Vec<Track>,
    },

    /// A search produced candidate tracks.
    Search(Vec<Track>),

    /// Nothing matched the identifier.
    Empty,

    /// Loading failed.
    Error(Exception),
}

impl LoadResult {
    /// Whether this result carries no tracks.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Search(tracks) => tracks.is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Metadata of a resolved playlist.
pub struct PlaylistInfo {
    /// Playlist name.
    pub name: String,
    /// Index of the selected track, `-1` when none.
    #[serde(default = "default_selected_track")]
    pub selected_track: i32,
}

fn default_selected_track() -> i32 {
    -1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Discord voice credentials forwarded to the node.
pub struct VoiceState {
    /// The voice token.
    pub token: String,
    /// The voice endpoint.
    pub endpoint: String,
    /// The voice session id.
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A player record as returned by the node's REST API.
pub struct PlayerInfo {
    /// The guild id of the player.
    pub guild_id: String,
    /// The playing track, if any.
    pub track: Option<Track>,
    /// Volume in percent, 0-1000.
    pub volume: u16,
    /// Whether the player is paused.
    pub paused: bool,
    /// The reported state.
    pub state: PlayerState,
    /// The voice credentials in use.
    pub voice: VoiceState,
    /// The filters in effect.
    pub filters: Filters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The composable audio-filter record. `Default` is the canonical empty
/// record: serializing it produces `{}`, which clears all filters.
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Volume multiplier, 0.0 to 5.0 where 1.0 is 100%.
    pub volume: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Gains for the 15 equalizer bands.
    pub equalizer: Option<Vec<Equalizer>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Vocal-suppression filter.
    pub karaoke: Option<Karaoke>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Speed, pitch and rate changes.
    pub timescale: Option<Timescale>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Volume oscillation.
    pub tremolo: Option<Tremolo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Pitch oscillation.
    pub vibrato: Option<Vibrato>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Stereo rotation (audio panning).
    pub rotation: Option<Rotation>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Distortion effect.
    pub distortion: Option<Distortion>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Channel mixing factors.
    pub channel_mix: Option<ChannelMix>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Low-pass smoothing.
    pub low_pass: Option<LowPass>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Plugin-defined filters, keyed by plugin name.
    pub plugin_filters: Option<HashMap<String, HashMap<String, Value>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// One equalizer band. Band 0-14, gain -0.25 to 1.0 where 0.0 is neutral.
pub struct Equalizer {
    /// The band index.
    pub band: u8,
    /// The gain multiplier.
    pub gain: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Suppresses a frequency band, usually targeting vocals.
pub struct Karaoke {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Effect level, 0.0 to 1.0.
    pub level: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Mono effect level, 0.0 to 1.0.
    pub mono_level: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Band to filter, in Hz.
    pub filter_band: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Width of the filtered band.
    pub filter_width: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Playback speed, pitch and rate. Each defaults to 1.0.
pub struct Timescale {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Playback speed.
    pub speed: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Pitch.
    pub pitch: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Rate.
    pub rate: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Oscillates the volume.
pub struct Tremolo {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Oscillation frequency, greater than 0.
    pub frequency: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Oscillation depth, 0.0 exclusive to 1.0.
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Oscillates the pitch.
pub struct Vibrato {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Oscillation frequency, 0.0 exclusive to 14.0.
    pub frequency: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Oscillation depth, 0.0 exclusive to 1.0.
    pub depth: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Rotates the audio around the stereo channels.
pub struct Rotation {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Rotation frequency in Hz.
    pub rotation_hz: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Distorts the audio.
pub struct Distortion {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Sine offset.
    pub sin_offset: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Sine scale.
    pub sin_scale: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Cosine offset.
    pub cos_offset: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Cosine scale.
    pub cos_scale: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tangent offset.
    pub tan_offset: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tangent scale.
    pub tan_scale: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Overall offset.
    pub offset: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Overall scale.
    pub scale: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Mixes the left and right channels.
pub struct ChannelMix {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Left-to-left factor, 0.0 to 1.0.
    pub left_to_left: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Left-to-right factor, 0.0 to 1.0.
    pub left_to_right: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Right-to-left factor, 0.0 to 1.0.
    pub right_to_left: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Right-to-right factor, 0.0 to 1.0.
    pub right_to_right: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Suppresses frequencies above the smoothing threshold.
pub struct LowPass {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Smoothing factor, greater than 1.0 to take effect.
    pub smoothing: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// The PATCH body for a player update. Absent fields are not sent; the nested
/// `Option` on [`UpdatePlayer::encoded_track`] and [`UpdatePlayer::end_time`]
/// distinguishes an explicit `null` from absence.
pub struct UpdatePlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    /// The encoded track to play, or `null` to stop the current one.
    pub encoded_track: Option<Option<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// An identifier for the node to resolve and play.
    pub identifier: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// The track position in milliseconds.
    pub position: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// The track end time in milliseconds, or `null` to reset it.
    pub end_time: Option<Option<u64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Volume in percent, 0-1000.
    pub volume: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Whether the player is paused.
    pub paused: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Filters to apply, replacing all previously applied ones.
    pub filters: Option<Filters>,

    #[serde(skip_serializing_if = "Option::is_none")]
    /// Voice credentials for connecting.
    pub voice: Option<VoiceState>,
}

impl UpdatePlayer {
    /// Set the encoded track, `None` stopping the current one.
    pub fn set_encoded_track(mut self, encoded: Option<String>) -> Self {
        self.encoded_track = Some(encoded);
        self
    }

    /// Set the identifier to resolve and play.
    pub fn set_identifier(mut self, identifier: &str) -> Self {
        self.identifier = Some(identifier.to_owned());
        self
    }

    /// Set the position in milliseconds.
    pub fn set_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    /// Set the end time in milliseconds, `None` resetting it.
    pub fn set_end_time(mut self, end_time: Option<u64>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Set the volume in percent.
    pub fn set_volume(mut self, volume: u16) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Set the paused flag.
    pub fn set_paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    /// Set the filters.
    pub fn set_filters(mut self, filters: Filters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Set the voice credentials.
    pub fn set_voice(mut self, voice: VoiceState) -> Self {
        self.voice = Some(voice);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
/// Outbound frame enabling session resuming.
pub struct ConfigureResuming<'a> {
    /// Frame opcode, always `configureResuming`.
    pub op: &'static str,
    /// The client-chosen resume key.
    pub key: &'a str,
    /// Seconds the node keeps the session alive after a disconnect.
    pub timeout: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Static information about a node.
pub struct NodeInfo {
    /// The node's version.
    pub version: VersionInfo,
    /// Unix build timestamp in milliseconds.
    pub build_time: i64,
    /// Git metadata of the build.
    pub git: GitInfo,
    /// JVM version the node runs on.
    pub jvm: String,
    /// Lavaplayer version in use.
    pub lavaplayer: String,
    /// Enabled source managers.
    pub source_managers: Vec<String>,
    /// Enabled filters.
    pub filters: Vec<String>,
    /// Installed plugins.
    pub plugins: Vec<PluginMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Version of a node.
pub struct VersionInfo {
    /// Full semver string.
    pub semver: String,
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
    /// Pre-release identifiers, if any.
    pub pre_release: Option<String>,
    /// Build metadata, if any.
    pub build: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Git metadata of a node build.
pub struct GitInfo {
    /// Branch the node was built from.
    pub branch: String,
    /// Commit hash.
    pub commit: String,
    /// Unix commit timestamp in milliseconds.
    pub commit_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// An installed node plugin.
pub struct PluginMeta {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// Best-effort decode of a REST error body. Every field is optional so a
/// partial or foreign body still yields a message.
pub struct RestErrorBody {
    /// Unix timestamp of the error in milliseconds.
    pub timestamp: Option<i64>,
    /// HTTP status code.
    pub status: Option<u16>,
    /// HTTP status message.
    pub error: Option<String>,
    /// The error message.
    pub message: Option<String>,
    /// The request path.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The `VOICE_SERVER_UPDATE` gateway packet payload.
pub struct VoiceServerUpdate {
    /// The voice token.
    pub token: String,
    /// The guild the update is for.
    pub guild_id: String,
    /// The voice endpoint. `null` while the region migrates.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The `VOICE_STATE_UPDATE` gateway packet payload, reduced to the fields the
/// cluster consumes.
pub struct VoiceStateUpdate {
    #[serde(default)]
    /// The guild the update is for. Absent outside guild contexts.
    pub guild_id: Option<String>,
    /// The user whose state changed.
    pub user_id: String,
    /// The voice session id.
    pub session_id: String,
    #[serde(default)]
    /// The joined channel, or `null` when the user left voice.
    pub channel_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_frame_deserializes() {
        let json = r#"{"op": "ready", "resumed": false, "sessionId": "la3kfltkdv7kcb7w"}"#;

        let message: Message = serde_json::from_str(json).expect("ready frame");

        match message {
            Message::Ready {
                resumed,
                session_id,
            } => {
                assert!(!resumed);
                assert_eq!(session_id, "la3kfltkdv7kcb7w");
            }
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[test]
    fn stats_frame_deserializes() {
        let json = r#"
        {
          "op": "stats",
          "players": 2,
          "playingPlayers": 1,
          "uptime": 123456789,
          "memory": {"free": 123456789, "used": 123456789, "allocated": 123456789, "reservable": 123456789},
          "cpu": {"cores": 4, "systemLoad": 0.5, "lavalinkLoad": 0.5},
          "frameStats": {"sent": 6000, "nulled": 10, "deficit": -3010}
        }
        "#;

        let message: Message = serde_json::from_str(json).expect("stats frame");

        match message {
            Message::Stats(stats) => {
                assert_eq!(stats.players, 2);
                assert_eq!(stats.playing_players, 1);
                assert_eq!(stats.cpu.cores, 4);
                assert_eq!(stats.memory.free, 123_456_789);
                assert_eq!(stats.frame_stats.expect("frame stats").deficit, -3010);
            }
            other => panic!("expected stats, got {:?}", other),
        }
    }

    #[test]
    fn track_end_event_deserializes() {
        let json = format!(
            r#"{{"op": "event", "type": "TrackEndEvent", "guildId": "123456789012345678", "track": {}, "reason": "finished"}}"#,
            track_json("dQw4w9WgXcQ", "RickAstleyVEVO")
        );

        let message: Message = serde_json::from_str(&json).expect("event frame");

        match message {
            Message::Event(ServerEvent::TrackEnd {
                guild_id, reason, ..
            }) => {
                assert_eq!(guild_id, "123456789012345678");
                assert_eq!(reason, TrackEndReason::Finished);
            }
            other => panic!("expected TrackEnd, got {:?}", other),
        }
    }

    #[test]
    fn player_update_frame_deserializes() {
        let json = r#"
        {
          "op": "playerUpdate",
          "guildId": "123456789012345678",
          "state": {"time": 1500467109, "position": 60000, "connected": true, "ping": 50}
        }
        "#;

        let message: Message = serde_json::from_str(json).expect("playerUpdate frame");

        match message {
            Message::PlayerUpdate { guild_id, state } => {
                assert_eq!(guild_id, "123456789012345678");
                assert_eq!(state.position, 60_000);
                assert!(state.connected);
            }
            other => panic!("expected playerUpdate, got {:?}", other),
        }
    }

    #[test]
    fn load_result_variants_deserialize() {
        let search = format!(
            r#"{{"loadType": "search", "data": [{}]}}"#,
            track_json("abc", "someone")
        );
        let result: LoadResult = serde_json::from_str(&search).expect("search result");
        assert!(matches!(result, LoadResult::Search(ref tracks) if tracks.len() == 1));

        let empty = r#"{"loadType": "empty", "data": null}"#;
        let result: LoadResult = serde_json::from_str(empty).expect("empty result");
        assert!(result.is_empty());

        let error = r#"
        {
          "loadType": "error",
          "data": {"message": "video unavailable", "severity": "common", "cause": "..."}
        }
        "#;
        let result: LoadResult = serde_json::from_str(error).expect("error result");
        match result {
            LoadResult::Error(exception) => {
                assert_eq!(exception.severity, Severity::Common);
                assert_eq!(exception.message.as_deref(), Some("video unavailable"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn update_player_skips_absent_fields() {
        let update = UpdatePlayer::default().set_encoded_track(Some("ENC".to_owned()));

        let json = serde_json::to_string(&update).expect("serialize");

        assert_eq!(json, r#"{"encodedTrack":"ENC"}"#);
    }

    #[test]
    fn update_player_sends_explicit_null_track() {
        let update = UpdatePlayer::default().set_encoded_track(None);

        let json = serde_json::to_string(&update).expect("serialize");

        assert_eq!(json, r#"{"encodedTrack":null}"#);
    }

    #[test]
    fn track_equality_uses_identifier() {
        let a: Track =
            serde_json::from_str(&track_json("same", "author one")).expect("track a");
        let b: Track =
            serde_json::from_str(&track_json("same", "author two")).expect("track b");
        let c: Track =
            serde_json::from_str(&track_json("other", "author one")).expect("track c");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    /// Minimal track JSON for fixtures.
    fn track_json(identifier: &str, author: &str) -> String {
        format!(
            r#"{{
              "encoded": "QAAAjQIA",
              "info": {{
                "identifier": "{identifier}",
                "isSeekable": true,
                "author": "{author}",
                "length": 212000,
                "isStream": false,
                "position": 0,
                "title": "a title",
                "uri": null,
                "artworkUrl": null,
                "isrc": null,
                "sourceName": "youtube"
              }}
            }}"#
        )
    }
}
