//! Per-guild player: voice handshake composition, playback control and the
//! queue driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cluster::Gateway;
use crate::events::{ClusterEvent, PlayerEvent};
use crate::model::{
    Filters, PlayerState, ServerEvent, Track, TrackEndReason, UpdatePlayer, VoiceServerUpdate,
    VoiceState, VoiceStateUpdate,
};
use crate::node::Node;
use crate::queue::{LoopMode, Queue, QueueSummary};
use crate::{validate, Error, Result};

#[derive(Debug, Clone, Copy)]
/// Options for [`Player::connect`].
pub struct ConnectOptions {
    /// Join muted. Off by default.
    pub mute: bool,
    /// Join deafened. On by default; a music bot never listens.
    pub deaf: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            mute: false,
            deaf: true,
        }
    }
}

#[derive(Debug, Clone)]
/// What to play: an encoded blob or a full track.
pub enum PlayInput {
    /// A base64 encoded track blob.
    Encoded(String),
    /// A resolved track.
    Track(Track),
}

impl From<String> for PlayInput {
    fn from(encoded: String) -> Self {
        Self::Encoded(encoded)
    }
}

impl From<&str> for PlayInput {
    fn from(encoded: &str) -> Self {
        Self::Encoded(encoded.to_owned())
    }
}

impl From<Track> for PlayInput {
    fn from(track: Track) -> Self {
        Self::Track(track)
    }
}

#[derive(Debug, Clone)]
/// Options for [`Player::play`].
pub struct PlayOptions {
    /// The track to play.
    pub track: PlayInput,
    /// Starting position in milliseconds.
    pub position: Option<u64>,
    /// End time in milliseconds.
    pub end_time: Option<u64>,
    /// Volume in percent, 0-1000.
    pub volume: Option<u16>,
    /// Start paused.
    pub paused: Option<bool>,
    /// Keep a currently playing track instead of replacing it.
    pub no_replace: bool,
}

impl PlayOptions {
    /// Play `track` with no further adjustments.
    pub fn new(track: impl Into<PlayInput>) -> Self {
        Self {
            track: track.into(),
            position: None,
            end_time: None,
            volume: None,
            paused: None,
            no_replace: false,
        }
    }
}

/// Mutable player fields, guarded by one per-guild lock.
#[derive(Debug)]
struct PlayerFields {
    track: Option<Track>,
    voice_channel: Option<String>,
    text_channel: Option<String>,
    volume: u16,
    paused: bool,
    playing: bool,
    position: u64,
    connected: bool,
    queue: Queue,
    autoplay: bool,
    voice_server: Option<VoiceServerUpdate>,
    voice_state: Option<VoiceStateUpdate>,
}

struct PlayerInner {
    guild_id: String,
    node: Node,
    gateway: Arc<dyn Gateway>,
    events: mpsc::UnboundedSender<ClusterEvent>,
    fields: StdMutex<PlayerFields>,
    destroyed: AtomicBool,
}

#[derive(Clone)]
/// Controller for one guild's playback, pinned to one node for its lifetime.
///
/// Clones share the same record. Once destroyed, every operation fails with
/// [`Error::PlayerNotFound`].
pub struct Player {
    inner: Arc<PlayerInner>,
}

impl Player {
    /// Create a player pinned to `node`. Used by the cluster registry.
    pub(crate) fn new(
        guild_id: String,
        node: Node,
        gateway: Arc<dyn Gateway>,
        events: mpsc::UnboundedSender<ClusterEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(PlayerInner {
                guild_id,
                node,
                gateway,
                events,
                fields: StdMutex::new(PlayerFields {
                    track: None,
                    voice_channel: None,
                    text_channel: None,
                    volume: 100,
                    paused: false,
                    playing: false,
                    position: 0,
                    connected: false,
                    queue: Queue::new(),
                    autoplay: true,
                    voice_server: None,
                    voice_state: None,
                }),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// The guild this player controls.
    pub fn guild_id(&self) -> &str {
        &self.inner.guild_id
    }

    /// The node this player renders on.
    pub fn node(&self) -> &Node {
        &self.inner.node
    }

    /// The track the node reported playing.
    pub fn current_track(&self) -> Option<Track> {
        self.inner.fields.lock().unwrap().track.clone()
    }

    /// The joined voice channel, if any.
    pub fn voice_channel(&self) -> Option<String> {
        self.inner.fields.lock().unwrap().voice_channel.clone()
    }

    /// The associated text channel, if any.
    pub fn text_channel(&self) -> Option<String> {
        self.inner.fields.lock().unwrap().text_channel.clone()
    }

    /// Associate a text channel with this player.
    pub fn set_text_channel(&self, channel_id: Option<String>) {
        self.inner.fields.lock().unwrap().text_channel = channel_id;
    }

    /// The local volume, 0-1000.
    pub fn volume(&self) -> u16 {
        self.inner.fields.lock().unwrap().volume
    }

    /// Whether playback is paused.
    pub fn is_paused(&self) -> bool {
        self.inner.fields.lock().unwrap().paused
    }

    /// Whether a track is playing.
    pub fn is_playing(&self) -> bool {
        self.inner.fields.lock().unwrap().playing
    }

    /// Whether the node reports a live voice connection.
    pub fn is_connected(&self) -> bool {
        self.inner.fields.lock().unwrap().connected
    }

    /// The last reported track position in milliseconds.
    pub fn position(&self) -> u64 {
        self.inner.fields.lock().unwrap().position
    }

    /// Whether the player advances the queue when a track finishes.
    pub fn autoplay(&self) -> bool {
        self.inner.fields.lock().unwrap().autoplay
    }

    /// Toggle queue advancement on track end.
    pub fn set_autoplay(&self, autoplay: bool) {
        self.inner.fields.lock().unwrap().autoplay = autoplay;
    }

    /// Whether this player was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// A snapshot of the queue.
    pub fn queue(&self) -> Queue {
        self.inner.fields.lock().unwrap().queue.clone()
    }

    /// Request to join `channel_id`, emitting the platform voice-join payload
    /// through the gateway. The node-side handshake completes once the
    /// resulting voice packets arrive.
    pub async fn connect(&self, channel_id: &str, options: ConnectOptions) -> Result<()> {
        self.ensure_alive()?;

        if !validate::is_snowflake(channel_id) {
            return Err(Error::InvalidChannel);
        }

        self.inner.fields.lock().unwrap().voice_channel = Some(channel_id.to_owned());

        let payload = voice_join_payload(
            self.guild_id(),
            Some(channel_id),
            options.mute,
            options.deaf,
        );

        self.inner
            .gateway
            .send_payload(self.guild_id(), payload)
            .await
    }

    /// Leave the voice channel.
    pub async fn disconnect(&self) -> Result<()> {
        self.ensure_alive()?;

        {
            let mut fields = self.inner.fields.lock().unwrap();
            fields.voice_channel = None;
            fields.connected = false;
        }

        let payload = voice_join_payload(self.guild_id(), None, false, true);

        self.inner
            .gateway
            .send_payload(self.guild_id(), payload)
            .await
    }

    /// Play a track, replacing the current one unless `no_replace` is set.
    pub async fn play(&self, options: PlayOptions) -> Result<()> {
        self.ensure_alive()?;

        if let Some(volume) = options.volume {
            validate::volume(volume)?;
        }

        let encoded = match &options.track {
            PlayInput::Encoded(encoded) => encoded.clone(),
            PlayInput::Track(track) => track.encoded.clone(),
        };

        let mut update = UpdatePlayer::default().set_encoded_track(Some(encoded));

        if let Some(position) = options.position {
            update = update.set_position(position);
        }
        if let Some(end_time) = options.end_time {
            update = update.set_end_time(Some(end_time));
        }
        if let Some(volume) = options.volume {
            update = update.set_volume(volume);
        }
        if let Some(paused) = options.paused {
            update = update.set_paused(paused);
        }

        self.inner
            .node
            .update_player(self.guild_id(), &update, options.no_replace)
            .await?;

        {
            let mut fields = self.inner.fields.lock().unwrap();
            fields.playing = true;
            if let PlayInput::Track(track) = options.track {
                fields.track = Some(track);
            }
            if let Some(volume) = options.volume {
                fields.volume = volume;
            }
            if let Some(paused) = options.paused {
                fields.paused = paused;
            }
        }

        Ok(())
    }

    /// Stop the current track without touching the queue.
    pub async fn stop(&self) -> Result<()> {
        self.ensure_alive()?;

        let update = UpdatePlayer::default().set_encoded_track(None);

        self.inner
            .node
            .update_player(self.guild_id(), &update, false)
            .await?;

        let mut fields = self.inner.fields.lock().unwrap();
        fields.track = None;
        fields.playing = false;

        Ok(())
    }

    /// Pause or unpause playback.
    pub async fn pause(&self, paused: bool) -> Result<()> {
        self.ensure_alive()?;

        let update = UpdatePlayer::default().set_paused(paused);

        self.inner
            .node
            .update_player(self.guild_id(), &update, false)
            .await?;

        self.inner.fields.lock().unwrap().paused = paused;

        Ok(())
    }

    /// Resume playback.
    pub async fn resume(&self) -> Result<()> {
        self.pause(false).await
    }

    /// Seek within the current track. The position is taken as signed
    /// milliseconds so host-side arithmetic underflows surface as
    /// [`Error::InvalidPosition`] instead of a wrapped jump.
    pub async fn seek(&self, position_ms: i64) -> Result<()> {
        self.ensure_alive()?;

        let position = validate::position(position_ms)?;

        {
            let fields = self.inner.fields.lock().unwrap();
            let track = fields.track.as_ref().ok_or(Error::NoTrackPlaying)?;

            if !track.info.is_seekable {
                return Err(Error::TrackNotSeekable);
            }
        }

        let update = UpdatePlayer::default().set_position(position);

        self.inner
            .node
            .update_player(self.guild_id(), &update, false)
            .await?;

        self.inner.fields.lock().unwrap().position = position;

        Ok(())
    }

    /// Set the player volume, 0-1000.
    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        self.ensure_alive()?;
        validate::volume(volume)?;

        let update = UpdatePlayer::default().set_volume(volume);

        self.inner
            .node
            .update_player(self.guild_id(), &update, false)
            .await?;

        self.inner.fields.lock().unwrap().volume = volume;

        Ok(())
    }

    /// Replace the filters in effect. The record is range-checked before
    /// anything is sent to the node.
    pub async fn set_filters(&self, filters: Filters) -> Result<()> {
        self.ensure_alive()?;
        validate::filters(&filters)?;

        let update = UpdatePlayer::default().set_filters(filters);

        self.inner
            .node
            .update_player(self.guild_id(), &update, false)
            .await?;

        Ok(())
    }

    /// Clear all filters by sending the empty record.
    pub async fn clear_filters(&self) -> Result<()> {
        self.set_filters(Filters::default()).await
    }

    /// Append a track to the queue.
    pub fn add_track(&self, track: Track) -> Result<()> {
        self.ensure_alive()?;

        self.inner.fields.lock().unwrap().queue.add(track);
        self.emit(PlayerEvent::QueueAdd { count: 1 });

        Ok(())
    }

    /// Append several tracks to the queue, returning how many were added.
    pub fn add_tracks(&self, tracks: Vec<Track>) -> Result<usize> {
        self.ensure_alive()?;

        let count = self.inner.fields.lock().unwrap().queue.add_many(tracks);
        self.emit(PlayerEvent::QueueAdd { count });

        Ok(count)
    }

    /// Remove the queued track at `index`.
    pub fn remove_track(&self, index: usize) -> Result<Option<Track>> {
        self.ensure_alive()?;

        let removed = self.inner.fields.lock().unwrap().queue.remove(index);

        if let Some(track) = &removed {
            self.emit(PlayerEvent::QueueRemove(track.clone()));
        }

        Ok(removed)
    }

    /// Drop all queued tracks.
    pub fn clear_queue(&self) -> Result<()> {
        self.ensure_alive()?;

        self.inner.fields.lock().unwrap().queue.clear();
        self.emit(PlayerEvent::QueueClear);

        Ok(())
    }

    /// Shuffle the queue uniformly.
    pub fn shuffle_queue(&self) -> Result<()> {
        self.ensure_alive()?;

        self.inner.fields.lock().unwrap().queue.shuffle();
        self.emit(PlayerEvent::QueueShuffle);

        Ok(())
    }

    /// Shuffle the queue, avoiding consecutive same-author tracks.
    pub fn smart_shuffle_queue(&self) -> Result<()> {
        self.ensure_alive()?;

        self.inner.fields.lock().unwrap().queue.smart_shuffle();
        self.emit(PlayerEvent::QueueShuffle);

        Ok(())
    }

    /// Set the queue loop mode.
    pub fn set_loop(&self, mode: LoopMode) -> Result<()> {
        self.ensure_alive()?;

        self.inner.fields.lock().unwrap().queue.set_loop_mode(mode);

        Ok(())
    }

    /// The queue loop mode.
    pub fn loop_mode(&self) -> LoopMode {
        self.inner.fields.lock().unwrap().queue.loop_mode()
    }

    /// A snapshot of queue metrics.
    pub fn queue_summary(&self) -> QueueSummary {
        self.inner.fields.lock().unwrap().queue.get_summary()
    }

    /// Advance to the next queued track. Returns `false` after stopping
    /// because the queue was exhausted.
    pub async fn skip(&self) -> Result<bool> {
        self.ensure_alive()?;

        let next = self.inner.fields.lock().unwrap().queue.poll();

        match next {
            Some(track) => {
                self.play(PlayOptions::new(track)).await?;
                Ok(true)
            }
            None => {
                self.stop().await?;
                self.emit(PlayerEvent::QueueEnd);
                Ok(false)
            }
        }
    }

    /// Destroy the player: best-effort delete on the node, then clear local
    /// state. Idempotent, and never fails.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.inner.node.destroy_player(self.guild_id()).await {
            debug!(
                guild_id = %self.guild_id(),
                error = %e,
                "destroy_player failed, dropping local state anyway"
            );
        }

        {
            let mut fields = self.inner.fields.lock().unwrap();
            fields.track = None;
            fields.playing = false;
            fields.paused = false;
            fields.connected = false;
            fields.voice_channel = None;
            fields.voice_server = None;
            fields.voice_state = None;
            fields.queue = Queue::new();
        }

        self.emit(PlayerEvent::Destroy);
    }

    /// Ingest one half of the voice handshake. Issues the voice update once
    /// both halves are present and the endpoint is known.
    pub(crate) async fn handle_voice_server_update(
        &self,
        update: VoiceServerUpdate,
    ) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }

        let voice = {
            let mut fields = self.inner.fields.lock().unwrap();
            fields.voice_server = Some(update);
            compose_voice(fields.voice_server.as_ref(), fields.voice_state.as_ref())
        };

        if let Some(voice) = voice {
            self.send_voice(voice).await?;
        }

        Ok(())
    }

    /// Ingest the bot's own voice state. A null channel means the bot left
    /// voice: local state is cleared and no REST call is made.
    pub(crate) async fn handle_voice_state_update(
        &self,
        update: VoiceStateUpdate,
    ) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }

        let voice = {
            let mut fields = self.inner.fields.lock().unwrap();

            if update.channel_id.is_none() {
                fields.voice_channel = None;
                fields.connected = false;
                fields.voice_state = None;
                None
            } else {
                fields.voice_channel = update.channel_id.clone();
                fields.voice_state = Some(update);
                compose_voice(fields.voice_server.as_ref(), fields.voice_state.as_ref())
            }
        };

        if let Some(voice) = voice {
            self.send_voice(voice).await?;
        }

        Ok(())
    }

    /// Forward composed voice credentials to the node.
    async fn send_voice(&self, voice: VoiceState) -> Result<()> {
        let update = UpdatePlayer::default().set_voice(voice);

        self.inner
            .node
            .update_player(self.guild_id(), &update, false)
            .await?;

        self.inner.fields.lock().unwrap().connected = true;

        Ok(())
    }

    /// Reconcile a node-pushed event with local state.
    pub(crate) async fn handle_server_event(&self, event: ServerEvent) {
        if self.is_destroyed() {
            return;
        }

        match event {
            ServerEvent::TrackStart { track, .. } => {
                {
                    let mut fields = self.inner.fields.lock().unwrap();
                    fields.track = Some(track.clone());
                    fields.playing = true;
                }

                self.emit(PlayerEvent::TrackStart(track));
            }
            ServerEvent::TrackEnd { track, reason, .. } => {
                self.inner.fields.lock().unwrap().playing = false;
                self.emit(PlayerEvent::TrackEnd {
                    track,
                    reason,
                });

                let advance = self.inner.fields.lock().unwrap().autoplay
                    && matches!(
                        reason,
                        TrackEndReason::Finished | TrackEndReason::LoadFailed
                    );

                if advance {
                    let next = self.inner.fields.lock().unwrap().queue.poll();

                    match next {
                        Some(track) => {
                            if let Err(e) = self.play(PlayOptions::new(track)).await {
                                warn!(
                                    guild_id = %self.guild_id(),
                                    error = %e,
                                    "failed to play next track"
                                );
                            }
                        }
                        None => self.emit(PlayerEvent::QueueEnd),
                    }
                }
            }
            ServerEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            } => {
                self.emit(PlayerEvent::TrackStuck {
                    track,
                    threshold_ms,
                });
            }
            ServerEvent::TrackException {
                track, exception, ..
            } => {
                self.emit(PlayerEvent::TrackException { track, exception });
            }
            ServerEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            } => {
                self.inner.fields.lock().unwrap().connected = false;
                self.emit(PlayerEvent::WebSocketClosed {
                    code,
                    reason,
                    by_remote,
                });
            }
        }
    }

    /// Ingest a node-pushed state snapshot.
    pub(crate) fn handle_player_update(&self, state: PlayerState) {
        if self.is_destroyed() {
            return;
        }

        {
            let mut fields = self.inner.fields.lock().unwrap();
            fields.position = state.position;
            fields.connected = state.connected;
        }

        self.emit(PlayerEvent::PlayerUpdate(state));
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::PlayerNotFound);
        }

        Ok(())
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.inner.events.send(ClusterEvent::Player {
            guild_id: self.inner.guild_id.clone(),
            event,
        });
    }
}

/// The platform voice-join payload, gateway opcode 4.
fn voice_join_payload(
    guild_id: &str,
    channel_id: Option<&str>,
    self_mute: bool,
    self_deaf: bool,
) -> Value {
    json!({
        "op": 4,
        "d": {
            "guild_id": guild_id,
            "channel_id": channel_id,
            "self_mute": self_mute,
            "self_deaf": self_deaf,
        }
    })
}

/// Compose the two handshake halves into node voice credentials. Yields a
/// value only when both halves are present and the endpoint is known.
pub(crate) fn compose_voice(
    server: Option<&VoiceServerUpdate>,
    state: Option<&VoiceStateUpdate>,
) -> Option<VoiceState> {
    let server = server?;
    let state = state?;
    let endpoint = server.endpoint.as_ref()?;

    Some(VoiceState {
        token: server.token.clone(),
        endpoint: endpoint.clone(),
        session_id: state.session_id.clone(),
    })
}

#[cfg(test)]
impl Player {
    /// Whether the voice-server half of the handshake is pending.
    pub(crate) fn has_pending_voice_server(&self) -> bool {
        self.inner.fields.lock().unwrap().voice_server.is_some()
    }

    /// Whether the voice-state half of the handshake is pending.
    pub(crate) fn has_pending_voice_state(&self) -> bool {
        self.inner.fields.lock().unwrap().voice_state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use crate::config::NodeConfig;
    use crate::events::NodeEvent;
    use crate::model::{Equalizer, TrackInfo};

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingGateway {
        payloads: StdMutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
        async fn send_payload(&self, guild_id: &str, payload: Value) -> Result<()> {
            self.payloads
                .lock()
                .unwrap()
                .push((guild_id.to_owned(), payload));
            Ok(())
        }
    }

    fn track(identifier: &str, seekable: bool) -> Track {
        Track {
            encoded: format!("enc:{}", identifier),
            info: TrackInfo {
                identifier: identifier.to_owned(),
                is_seekable: seekable,
                author: "someone".to_owned(),
                length: 180_000,
                is_stream: false,
                position: 0,
                title: identifier.to_owned(),
                uri: None,
                artwork_url: None,
                isrc: None,
                source_name: None,
            },
            plugin_info: HashMap::new(),
            user_data: HashMap::new(),
        }
    }

    fn player() -> (
        Player,
        Arc<RecordingGateway>,
        mpsc::UnboundedReceiver<ClusterEvent>,
    ) {
        let (events, receiver) = mpsc::unbounded_channel();
        let gateway = Arc::new(RecordingGateway::default());
        let node = Node::new(
            NodeConfig::new("main", "localhost", 2333, "youshallnotpass"),
            "Rias",
            false,
            events.clone(),
        )
        .expect("node record");

        let player = Player::new(
            "123456789012345678".to_owned(),
            node,
            gateway.clone(),
            events,
        );

        (player, gateway, receiver)
    }

    fn server_update(endpoint: Option<&str>) -> VoiceServerUpdate {
        VoiceServerUpdate {
            token: "tok".to_owned(),
            guild_id: "123456789012345678".to_owned(),
            endpoint: endpoint.map(str::to_owned),
        }
    }

    fn state_update(channel_id: Option<&str>) -> VoiceStateUpdate {
        VoiceStateUpdate {
            guild_id: Some("123456789012345678".to_owned()),
            user_id: "987654321098765432".to_owned(),
            session_id: "sess".to_owned(),
            channel_id: channel_id.map(str::to_owned),
        }
    }

    #[test]
    fn voice_composes_only_with_both_halves_and_endpoint() {
        let server = server_update(Some("us-east.example.com"));
        let state = state_update(Some("111111111111111111"));

        assert!(compose_voice(None, None).is_none());
        assert!(compose_voice(Some(&server), None).is_none());
        assert!(compose_voice(None, Some(&state)).is_none());

        let migrating = server_update(None);
        assert!(compose_voice(Some(&migrating), Some(&state)).is_none());

        let voice = compose_voice(Some(&server), Some(&state)).expect("both halves");
        assert_eq!(voice.token, "tok");
        assert_eq!(voice.endpoint, "us-east.example.com");
        assert_eq!(voice.session_id, "sess");
    }

    #[tokio::test]
    async fn connect_rejects_invalid_channel_without_output() {
        let (player, gateway, _events) = player();

        let result = player.connect("not-a-channel-id", ConnectOptions::default()).await;

        assert!(matches!(result, Err(Error::InvalidChannel)));
        assert!(gateway.payloads.lock().unwrap().is_empty());
        assert!(player.voice_channel().is_none());
    }

    #[tokio::test]
    async fn connect_emits_the_voice_join_opcode() {
        let (player, gateway, _events) = player();

        player
            .connect("111111111111111111", ConnectOptions::default())
            .await
            .expect("connect");

        let payloads = gateway.payloads.lock().unwrap();
        let (guild_id, payload) = payloads.first().expect("one payload");

        assert_eq!(guild_id, "123456789012345678");
        assert_eq!(payload["op"], 4);
        assert_eq!(payload["d"]["guild_id"], "123456789012345678");
        assert_eq!(payload["d"]["channel_id"], "111111111111111111");
        assert_eq!(payload["d"]["self_mute"], false);
        assert_eq!(payload["d"]["self_deaf"], true);
        assert_eq!(player.voice_channel().as_deref(), Some("111111111111111111"));
    }

    #[tokio::test]
    async fn null_channel_clears_voice_state_without_rest() {
        let (player, _gateway, _events) = player();

        // Only one half arrived, so no REST call was attempted yet.
        player
            .handle_voice_server_update(server_update(Some("ep")))
            .await
            .expect("server half");
        assert!(player.has_pending_voice_server());

        player
            .handle_voice_state_update(state_update(None))
            .await
            .expect("leave voice");

        assert!(player.voice_channel().is_none());
        assert!(!player.is_connected());
        assert!(!player.has_pending_voice_state());
    }

    #[tokio::test]
    async fn track_start_reconciles_state() {
        let (player, _gateway, mut events) = player();

        player
            .handle_server_event(ServerEvent::TrackStart {
                guild_id: "123456789012345678".to_owned(),
                track: track("abc", true),
            })
            .await;

        assert!(player.is_playing());
        assert_eq!(
            player.current_track().map(|t| t.info.identifier),
            Some("abc".to_owned())
        );

        match events.try_recv() {
            Ok(ClusterEvent::Player {
                event: PlayerEvent::TrackStart(track),
                ..
            }) => assert_eq!(track.info.identifier, "abc"),
            other => panic!("expected TrackStart, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn track_end_with_empty_queue_emits_queue_end() {
        let (player, _gateway, mut events) = player();

        player
            .handle_server_event(ServerEvent::TrackEnd {
                guild_id: "123456789012345678".to_owned(),
                track: track("abc", true),
                reason: TrackEndReason::Finished,
            })
            .await;

        assert!(!player.is_playing());

        let mut saw_track_end = false;
        let mut saw_queue_end = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ClusterEvent::Player {
                    event: PlayerEvent::TrackEnd { .. },
                    ..
                } => saw_track_end = true,
                ClusterEvent::Player {
                    event: PlayerEvent::QueueEnd,
                    ..
                } => saw_queue_end = true,
                _ => {}
            }
        }

        assert!(saw_track_end);
        assert!(saw_queue_end);
    }

    #[tokio::test]
    async fn stopped_tracks_do_not_advance_the_queue() {
        let (player, _gateway, mut events) = player();
        player.add_track(track("queued", true)).expect("add");

        player
            .handle_server_event(ServerEvent::TrackEnd {
                guild_id: "123456789012345678".to_owned(),
                track: track("abc", true),
                reason: TrackEndReason::Stopped,
            })
            .await;

        // The queued track must still be there; no play was attempted.
        assert_eq!(player.queue().len(), 1);

        while let Ok(event) = events.try_recv() {
            if let ClusterEvent::Player {
                event: PlayerEvent::QueueEnd,
                ..
            } = event
            {
                panic!("queue must not end on a stopped track");
            }
        }
    }

    #[tokio::test]
    async fn player_update_reconciles_position_and_connection() {
        let (player, _gateway, _events) = player();

        player.handle_player_update(PlayerState {
            time: 1_500_467_109,
            position: 42_000,
            connected: true,
            ping: 12,
        });

        assert_eq!(player.position(), 42_000);
        assert!(player.is_connected());
    }

    #[tokio::test]
    async fn seek_requires_a_seekable_track() {
        let (player, _gateway, _events) = player();

        let result = player.seek(-1).await;
        assert!(matches!(result, Err(Error::InvalidPosition)));

        let result = player.seek(1000).await;
        assert!(matches!(result, Err(Error::NoTrackPlaying)));

        player
            .handle_server_event(ServerEvent::TrackStart {
                guild_id: "123456789012345678".to_owned(),
                track: track("radio", false),
            })
            .await;

        let result = player.seek(1000).await;
        assert!(matches!(result, Err(Error::TrackNotSeekable)));
    }

    #[tokio::test]
    async fn set_filters_rejects_out_of_range_values_before_rest() {
        let (player, _gateway, _events) = player();

        let invalid = Filters {
            equalizer: Some(vec![Equalizer { band: 99, gain: 5.0 }]),
            ..Default::default()
        };

        // InvalidFilter, not NodeNotConnected: the record is rejected before
        // the node is ever consulted.
        let result = player.set_filters(invalid).await;
        assert!(matches!(result, Err(Error::InvalidFilter(_))));

        let result = player.set_filters(Filters::default()).await;
        assert!(matches!(result, Err(Error::NodeNotConnected)));
    }

    #[tokio::test]
    async fn destroy_is_an_idempotent_latch() {
        let (player, _gateway, mut events) = player();
        player.add_track(track("abc", true)).expect("add");

        player.destroy().await;
        player.destroy().await;

        assert!(player.is_destroyed());
        assert!(player.queue().is_empty());
        assert!(matches!(
            player.add_track(track("more", true)),
            Err(Error::PlayerNotFound)
        ));
        assert!(matches!(
            player.play(PlayOptions::new("ENC")).await,
            Err(Error::PlayerNotFound)
        ));

        let destroys = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| {
                matches!(
                    event,
                    ClusterEvent::Player {
                        event: PlayerEvent::Destroy,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(destroys, 1);
    }

    #[tokio::test]
    async fn queue_operations_emit_events() {
        let (player, _gateway, mut events) = player();

        player
            .add_tracks(vec![track("a", true), track("b", true)])
            .expect("add many");
        player.remove_track(0).expect("remove");
        player.clear_queue().expect("clear");
        player.shuffle_queue().expect("shuffle");

        let mut kinds = Vec::new();
        while let Ok(ClusterEvent::Player { event, .. }) = events.try_recv() {
            kinds.push(event);
        }

        assert!(matches!(kinds[0], PlayerEvent::QueueAdd { count: 2 }));
        assert!(matches!(kinds[1], PlayerEvent::QueueRemove(_)));
        assert!(matches!(kinds[2], PlayerEvent::QueueClear));
        assert!(matches!(kinds[3], PlayerEvent::QueueShuffle));
    }

    #[tokio::test]
    async fn rest_ops_fail_fast_when_the_node_is_not_ready() {
        let (player, _gateway, mut events) = player();

        let result = player.play(PlayOptions::new("ENC")).await;
        assert!(matches!(result, Err(Error::NodeNotConnected)));

        player.node().force_state(crate::node::NodeState::Connected);
        let result = player.pause(true).await;
        assert!(matches!(result, Err(Error::NodeNotReady)));

        // No frames were produced by those failures.
        while let Ok(event) = events.try_recv() {
            if let ClusterEvent::Node {
                event: NodeEvent::Connect | NodeEvent::Ready { .. },
                ..
            } = event
            {
                panic!("no connection activity expected");
            }
        }
    }
}
