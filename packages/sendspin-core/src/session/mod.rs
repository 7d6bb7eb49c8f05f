//! Session lifecycle: handshake, message dispatch and the task set.
//!
//! A connected session runs four tasks beside the transport's socket tasks:
//! a text-frame dispatcher, a binary-frame dispatcher, the clock-sync probe
//! driver and the serialized `client/state` reporter, plus the render pump
//! that moves scheduled chunks into the renderer. All of them select on one
//! cancellation token, so `disconnect` tears the whole set down without
//! leaving zombies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::ClockSync;
use crate::decoder::{samples_to_bytes, Decoder};
use crate::error::{
    ClientError, ClientResult, DecoderError, DeviceError, ProtocolError, TransportError,
};
use crate::events::{ClientEvent, GroupInfo, TrackMetadata};
use crate::format::{AudioCodec, AudioFormat};
use crate::protocol::binary::{BinaryKind, BinaryMessage};
use crate::protocol::messages::{self as msg, Message};
use crate::protocol_constants::{HANDSHAKE_TIMEOUT_SECS, PROTOCOL_VERSION, SERVER_HELLO_GRACE_MS};
use crate::renderer::{Renderer, VolumeState};
use crate::scheduler::{ChunkScheduler, ScheduledChunk, SchedulerStats};
use crate::state::{ClientConfig, Role};
use crate::time::now_us;
use crate::transport::WsTransport;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

/// Why a stream could not be brought up. Internal: all variants collapse to
/// the player error state without touching the connection.
#[derive(Debug, thiserror::Error)]
enum StreamSetupError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// State shared by the session tasks.
struct SessionShared {
    config: ClientConfig,
    transport: Arc<WsTransport>,
    clock: Arc<Mutex<ClockSync>>,
    scheduler: Arc<ChunkScheduler>,
    stats: Arc<SchedulerStats>,
    volume: Arc<VolumeState>,
    playback: Mutex<msg::PlayerSyncState>,
    /// Codec state for the active stream; replaced on stream start.
    decoder: tokio::sync::Mutex<Option<Decoder>>,
    /// Device output for the active stream.
    renderer: tokio::sync::Mutex<Option<Renderer>>,
    stream_format: Mutex<Option<AudioFormat>>,
    state: Arc<Mutex<SessionState>>,
    events_tx: broadcast::Sender<ClientEvent>,
    report: Notify,
    report_dirty: AtomicBool,
    cancel: CancellationToken,
}

impl SessionShared {
    fn emit(&self, event: ClientEvent) {
        // Send fails only when no subscriber is listening, which is fine.
        let _ = self.events_tx.send(event);
    }

    /// Requests a `client/state` report. The reporter task serializes them:
    /// at most one in flight, re-sent when state changed mid-send.
    fn mark_report(&self) {
        self.report_dirty.store(true, Ordering::Relaxed);
        self.report.notify_one();
    }

    fn set_playback(&self, state: msg::PlayerSyncState) {
        let changed = {
            let mut playback = self.playback.lock();
            let changed = *playback != state;
            *playback = state;
            changed
        };
        if changed {
            self.mark_report();
        }
    }
}

struct ActiveSession {
    shared: Arc<SessionShared>,
    tasks: Vec<JoinHandle<()>>,
}

/// A Sendspin player client.
///
/// One instance per connection. The embedder owns the instance, subscribes
/// to [`ClientEvent`]s and drives `connect`/`disconnect`; everything else
/// (clock sync, scheduling, decode, render) happens inside.
pub struct SendspinClient {
    config: ClientConfig,
    events_tx: broadcast::Sender<ClientEvent>,
    state: Arc<Mutex<SessionState>>,
    session: tokio::sync::Mutex<Option<ActiveSession>>,
}

impl SendspinClient {
    /// Creates a client with the given configuration.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate().map_err(ClientError::InvalidConfig)?;
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity);
        Ok(Self {
            config,
            events_tx,
            state: Arc::new(Mutex::new(SessionState::Disconnected)),
            session: tokio::sync::Mutex::new(None),
        })
    }

    /// Subscribes to the event stream. Subscriptions survive reconnects.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Connects to a server and runs the handshake. On success the session
    /// tasks are live and events start flowing.
    pub async fn connect(&self, url: &str) -> ClientResult<()> {
        let mut session_slot = self.session.lock().await;
        if session_slot.is_some() {
            return Err(TransportError::AlreadyConnected.into());
        }
        *self.state.lock() = SessionState::Connecting;
        // One budget for the full handshake (connect + auth + server/hello),
        // anchored at the moment Connecting is entered. The transport's own
        // 5s connect timeout fails fast inside it; it does not extend it.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);

        match self.run_handshake(url, deadline).await {
            Ok(session) => {
                *self.state.lock() = SessionState::Connected;
                *session_slot = Some(session);
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn run_handshake(
        &self,
        url: &str,
        deadline: tokio::time::Instant,
    ) -> ClientResult<ActiveSession> {
        let transport = Arc::new(WsTransport::connect(url).await?);
        let result = self.handshake_on(&transport, deadline).await;
        if result.is_err() {
            transport.disconnect().await;
        }
        result
    }

    async fn handshake_on(
        &self,
        transport: &Arc<WsTransport>,
        deadline: tokio::time::Instant,
    ) -> ClientResult<ActiveSession> {
        let mut text_rx = transport
            .take_text_frames()
            .ok_or_else(|| ClientError::Handshake("text frame stream unavailable".into()))?;
        let binary_rx = transport
            .take_binary_frames()
            .ok_or_else(|| ClientError::Handshake("binary frame stream unavailable".into()))?;

        // Messages that arrive during the handshake but belong to the
        // session proper (early stream/start, session/update, ...) are
        // replayed into the dispatcher once the tasks are up.
        let mut backlog: Vec<Message> = Vec::new();

        // Authentication precedes everything else when a token is set.
        let authed = if let Some(token) = &self.config.auth_token {
            *self.state.lock() = SessionState::Authenticating;
            send_message(
                transport,
                &Message::Auth(msg::Auth {
                    token: token.clone(),
                    client_id: self.config.client_id.clone(),
                }),
            )
            .await?;
            loop {
                let frame = tokio::time::timeout_at(deadline, text_rx.recv())
                    .await
                    .map_err(|_| TransportError::ConnectionTimeout)?;
                let Some(text) = frame else {
                    return Err(ClientError::AuthenticationFailed(
                        "server closed the connection during auth".into(),
                    ));
                };
                match serde_json::from_str::<Message>(&text) {
                    Ok(Message::AuthOk(_)) => break,
                    Ok(other) => backlog.push(other),
                    Err(e) => log::warn!("ignoring unparseable frame during auth: {e}"),
                }
            }
            true
        } else {
            false
        };

        send_message(transport, &build_client_hello(&self.config)).await?;

        // Await server/hello. Authenticated servers are granted a short
        // grace period and then assumed connected (some omit the hello);
        // the no-auth path fails hard at the handshake deadline.
        let hello_deadline = if authed {
            tokio::time::Instant::now() + Duration::from_millis(SERVER_HELLO_GRACE_MS)
        } else {
            deadline
        };
        loop {
            match tokio::time::timeout_at(hello_deadline, text_rx.recv()).await {
                Ok(Some(text)) => match serde_json::from_str::<Message>(&text) {
                    Ok(Message::ServerHello(hello)) => {
                        log::info!("connected to server: {} ({})", hello.name, hello.server_id);
                        break;
                    }
                    Ok(other) => backlog.push(other),
                    Err(e) => log::warn!("ignoring unparseable frame during handshake: {e}"),
                },
                Ok(None) => {
                    return Err(ClientError::Handshake(
                        "server closed the connection during handshake".into(),
                    ))
                }
                Err(_) if authed => {
                    log::info!("no server/hello after auth/ok; assuming connected");
                    break;
                }
                Err(_) => return Err(TransportError::ConnectionTimeout.into()),
            }
        }

        Ok(self.spawn_session(Arc::clone(transport), text_rx, binary_rx, backlog))
    }

    /// Builds the per-session components and spawns the task set.
    fn spawn_session(
        &self,
        transport: Arc<WsTransport>,
        text_rx: mpsc::Receiver<String>,
        binary_rx: mpsc::Receiver<Bytes>,
        backlog: Vec<Message>,
    ) -> ActiveSession {
        let clock = Arc::new(Mutex::new(ClockSync::new(self.config.clock_sync.gain)));
        let scheduler = ChunkScheduler::new(&self.config.scheduler, Arc::clone(&clock));
        let stats = scheduler.stats();
        let scheduled_rx = scheduler
            .take_output()
            .expect("fresh scheduler always has an output");

        let shared = Arc::new(SessionShared {
            config: self.config.clone(),
            transport,
            clock,
            scheduler,
            stats,
            volume: Arc::new(VolumeState::default()),
            playback: Mutex::new(msg::PlayerSyncState::Synchronized),
            decoder: tokio::sync::Mutex::new(None),
            renderer: tokio::sync::Mutex::new(None),
            stream_format: Mutex::new(None),
            state: Arc::clone(&self.state),
            events_tx: self.events_tx.clone(),
            report: Notify::new(),
            report_dirty: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        shared.emit(ClientEvent::ServerConnected);
        // Initial client/state report goes out as soon as the reporter runs.
        shared.mark_report();
        shared.scheduler.start();

        let tasks = vec![
            tokio::spawn(run_text_loop(Arc::clone(&shared), text_rx, backlog)),
            tokio::spawn(run_binary_loop(Arc::clone(&shared), binary_rx)),
            tokio::spawn(run_clock_probes(Arc::clone(&shared))),
            tokio::spawn(run_state_reporter(Arc::clone(&shared))),
            tokio::spawn(run_render_pump(Arc::clone(&shared), scheduled_rx)),
        ];

        ActiveSession { shared, tasks }
    }

    /// Disconnects and tears down every session task. Idempotent.
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        let Some(session) = session else {
            return;
        };
        // Best-effort farewell so the server sees a deliberate departure.
        let goodbye = Message::ClientGoodbye(msg::ClientGoodbye {
            reason: msg::GoodbyeReason::UserRequest,
        });
        let _ = send_message(&session.shared.transport, &goodbye).await;
        shutdown_session(&session.shared).await;
        for task in session.tasks {
            let _ = task.await;
        }
        *self.state.lock() = SessionState::Disconnected;
    }

    /// Sets the playback volume (0.0 to 1.0) and reports the new state.
    pub async fn set_volume(&self, volume: f32) {
        if let Some(session) = self.session.lock().await.as_ref() {
            let value = (volume.clamp(0.0, 1.0) * 100.0) as u8;
            session.shared.volume.set_value(value);
            session.shared.mark_report();
        }
    }

    /// Sets the mute state and reports it.
    pub async fn set_mute(&self, muted: bool) {
        if let Some(session) = self.session.lock().await.as_ref() {
            session.shared.volume.set_muted(muted);
            session.shared.mark_report();
        }
    }

    /// Whether the underlying transport is currently open.
    pub async fn is_connected(&self) -> bool {
        match self.session.lock().await.as_ref() {
            Some(session) => session.shared.transport.is_connected(),
            None => false,
        }
    }
}

/// Stops every session component. Safe to call more than once.
async fn shutdown_session(shared: &Arc<SessionShared>) {
    shared.cancel.cancel();
    shared.scheduler.finish();
    teardown_stream(shared).await;
    shared.transport.disconnect().await;
    *shared.state.lock() = SessionState::Disconnected;
}

/// Tears down the per-stream pipeline (decoder, renderer, queued chunks).
/// The scheduler output stays open so the next stream can reuse it.
async fn teardown_stream(shared: &Arc<SessionShared>) {
    shared.scheduler.stop();
    if let Some(mut decoder) = shared.decoder.lock().await.take() {
        decoder.close();
    }
    if let Some(mut renderer) = shared.renderer.lock().await.take() {
        renderer.stop();
    }
    *shared.stream_format.lock() = None;
}

async fn send_message(transport: &Arc<WsTransport>, message: &Message) -> ClientResult<()> {
    let json = message
        .to_json()
        .map_err(|e| TransportError::EncodingFailed(e.to_string()))?;
    transport.send_text(json).await?;
    Ok(())
}

fn build_client_hello(config: &ClientConfig) -> Message {
    let player_support = config
        .player
        .as_ref()
        .filter(|_| config.roles.contains(&Role::Player))
        .map(|player| msg::PlayerSupport {
            supported_formats: player.supported_formats.clone(),
            buffer_capacity: player.buffer_capacity as u64,
            supported_commands: vec!["volume".into(), "mute".into()],
        });
    Message::ClientHello(msg::ClientHello {
        client_id: config.client_id.clone(),
        name: config.display_name.clone(),
        device_info: Some(msg::DeviceInfo {
            product_name: Some("Sendspin Core".into()),
            manufacturer: None,
            software_version: Some(env!("CARGO_PKG_VERSION").into()),
        }),
        version: PROTOCOL_VERSION,
        supported_roles: config.roles.iter().map(|r| r.as_str().to_string()).collect(),
        player_support,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn run_text_loop(
    shared: Arc<SessionShared>,
    mut rx: mpsc::Receiver<String>,
    backlog: Vec<Message>,
) {
    for message in backlog {
        handle_message(&shared, message).await;
    }
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = rx.recv() => {
                match frame {
                    Some(text) => match serde_json::from_str::<Message>(&text) {
                        Ok(message) => handle_message(&shared, message).await,
                        // Parse failures are logged and skipped; they never
                        // terminate the session.
                        Err(e) => log_frame_error(&text, &e),
                    },
                    None => {
                        if !shared.cancel.is_cancelled() {
                            shared.emit(ClientEvent::Error("connection to server lost".into()));
                            shutdown_session(&shared).await;
                        }
                        break;
                    }
                }
            }
        }
    }
}

/// Classifies a frame that failed to parse: a well-formed envelope with an
/// unrecognized `type` is an unknown message, anything else is junk.
fn log_frame_error(text: &str, parse_error: &serde_json::Error) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => {
            let message_type = value["type"].as_str().unwrap_or("<missing>").to_string();
            log::warn!(
                "skipping frame: {}",
                ProtocolError::UnknownMessageType(message_type)
            );
        }
        Err(_) => log::warn!("skipping unparseable control frame: {parse_error}"),
    }
}

async fn handle_message(shared: &Arc<SessionShared>, message: Message) {
    match message {
        Message::ServerTime(time) => {
            let t4 = now_us();
            shared.clock.lock().process(
                time.client_transmitted,
                time.server_received,
                time.server_transmitted,
                t4,
            );
        }
        Message::StreamStart(start) => handle_stream_start(shared, start).await,
        Message::StreamEnd(_) => {
            teardown_stream(shared).await;
            shared.set_playback(msg::PlayerSyncState::Synchronized);
            shared.emit(ClientEvent::StreamEnded);
        }
        Message::StreamMetadata(meta) => {
            let metadata = TrackMetadata {
                title: meta.title,
                artist: meta.artist,
                album: meta.album,
                artwork_url: meta.artwork_url,
                ..TrackMetadata::default()
            };
            if !metadata.is_empty() {
                shared.emit(ClientEvent::MetadataReceived(metadata));
            }
        }
        Message::SessionUpdate(update) => {
            let group = GroupInfo {
                group_id: update.group_id,
                group_name: update.group_name,
                playback_state: update.playback_state,
            };
            if group != GroupInfo::default() {
                shared.emit(ClientEvent::GroupUpdated(group));
            }
            if let Some(meta) = update.metadata {
                let metadata = TrackMetadata {
                    title: meta.title,
                    artist: meta.artist,
                    album: meta.album,
                    album_artist: meta.album_artist,
                    track: meta.track,
                    track_duration: meta.track_duration,
                    year: meta.year,
                    artwork_url: meta.artwork_url,
                };
                if !metadata.is_empty() {
                    shared.emit(ClientEvent::MetadataReceived(metadata));
                }
            }
        }
        Message::ServerCommand(command) => {
            if let Some(player) = command.player {
                match player.command.as_str() {
                    "volume" => {
                        if let Some(volume) = player.volume {
                            shared.volume.set_value(volume);
                        }
                    }
                    "mute" => {
                        if let Some(muted) = player.muted {
                            shared.volume.set_muted(muted);
                        }
                    }
                    other => log::debug!("unsupported player command: {other}"),
                }
                // Echo the applied values back to the server.
                shared.mark_report();
            }
        }
        Message::ServerHello(_) | Message::AuthOk(_) => {
            log::debug!("ignoring duplicate handshake message");
        }
        Message::Auth(_) | Message::ClientHello(_) | Message::ClientTime(_)
        | Message::ClientState(_) | Message::ClientGoodbye(_) => {
            log::debug!("ignoring client-originated message from server");
        }
    }
}

async fn handle_stream_start(shared: &Arc<SessionShared>, start: msg::StreamStart) {
    let Some(player) = start.player else {
        return;
    };
    // A stream/start on top of a playing stream replaces it; servers do not
    // reliably send a stream/end first.
    if shared.stream_format.lock().is_some() {
        log::info!("stream/start while playing, replacing the active stream");
    }
    teardown_stream(shared).await;

    match build_stream(shared, &player).await {
        Ok(format) => {
            shared.scheduler.start();
            *shared.stream_format.lock() = Some(format);
            shared.set_playback(msg::PlayerSyncState::Buffering);
            shared.emit(ClientEvent::StreamStarted(format));
            tracing::info!(
                codec = %format.codec,
                sample_rate = format.sample_rate,
                channels = format.channels,
                bit_depth = format.bit_depth,
                "stream started"
            );
        }
        Err(e) => {
            tracing::error!("stream start failed: {e}");
            shared.set_playback(msg::PlayerSyncState::Error);
        }
    }
}

/// Validates the negotiated format and brings up the decoder and renderer.
async fn build_stream(
    shared: &Arc<SessionShared>,
    player: &msg::StreamStartPlayer,
) -> Result<AudioFormat, StreamSetupError> {
    let codec = AudioCodec::parse(&player.codec)?;
    let format = AudioFormat::new(codec, player.sample_rate, player.channels, player.bit_depth);
    format.validate()?;

    // The server must pick from the advertised list.
    let advertised = shared
        .config
        .player
        .as_ref()
        .is_some_and(|p| p.supported_formats.iter().any(|f| f.codec == codec));
    if !advertised {
        return Err(ProtocolError::UnsupportedCodec(player.codec.clone()).into());
    }

    let codec_header = match &player.codec_header {
        Some(encoded) => Some(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| ProtocolError::InvalidCodecHeader(e.to_string()))?,
        ),
        None => None,
    };

    let decoder = Decoder::new(&format, codec_header.as_deref()).await?;
    let buffer_capacity = shared
        .config
        .player
        .as_ref()
        .map(|p| p.buffer_capacity)
        .unwrap_or(2 * 1024 * 1024);
    let mut renderer = Renderer::new(
        format,
        buffer_capacity,
        Arc::clone(&shared.volume),
        Arc::clone(&shared.stats),
    );
    renderer.start()?;

    *shared.decoder.lock().await = Some(decoder);
    *shared.renderer.lock().await = Some(renderer);
    Ok(format)
}

async fn run_binary_loop(shared: Arc<SessionShared>, mut rx: mpsc::Receiver<Bytes>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            frame = rx.recv() => {
                match frame {
                    Some(data) => handle_binary(&shared, &data).await,
                    // The text loop owns the connection-lost signaling.
                    None => break,
                }
            }
        }
    }
}

async fn handle_binary(shared: &Arc<SessionShared>, data: &Bytes) {
    let message = match BinaryMessage::parse(data) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("dropping invalid binary frame: {e}");
            return;
        }
    };
    match message.kind() {
        BinaryKind::AudioChunk => {
            let decoded = {
                let mut decoder_slot = shared.decoder.lock().await;
                let Some(decoder) = decoder_slot.as_mut() else {
                    log::debug!("audio chunk without an active stream, dropped");
                    return;
                };
                decoder.decode(&message.payload).await
            };
            match decoded {
                Ok(samples) => {
                    if !samples.is_empty() {
                        shared
                            .scheduler
                            .schedule(samples_to_bytes(&samples), message.server_timestamp_us);
                    }
                }
                Err(e) => {
                    tracing::error!("decode failed, stopping the stream: {e}");
                    teardown_stream(shared).await;
                    shared.set_playback(msg::PlayerSyncState::Error);
                }
            }
        }
        BinaryKind::Artwork(channel) => {
            // An empty payload clears the display.
            shared.emit(ClientEvent::ArtworkReceived {
                channel,
                data: message.payload,
            });
        }
        BinaryKind::Visualizer => {
            shared.emit(ClientEvent::VisualizerData(message.payload));
        }
        BinaryKind::Application => {
            shared.emit(ClientEvent::ApplicationData {
                message_type: message.message_type,
                payload: message.payload,
            });
        }
        BinaryKind::Ignored => {}
    }
}

/// Sends sync probes: a rapid initial burst, then a steady cadence for the
/// life of the session.
async fn run_clock_probes(shared: Arc<SessionShared>) {
    let config = shared.config.clock_sync.clone();
    for _ in 0..config.initial_probes {
        send_probe(&shared).await;
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(config.initial_interval_ms)) => {}
        }
    }
    let mut ticker = tokio::time::interval(Duration::from_millis(config.steady_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => send_probe(&shared).await,
        }
    }
}

async fn send_probe(shared: &Arc<SessionShared>) {
    let message = Message::ClientTime(msg::ClientTime {
        client_transmitted: now_us(),
    });
    match message.to_json() {
        Ok(json) => {
            if shared.transport.send_text(json).await.is_err() {
                log::debug!("sync probe dropped: transport closed");
            }
        }
        Err(e) => log::warn!("failed to encode sync probe: {e}"),
    }
}

/// Serializes `client/state` reports: at most one in flight, with a dirty
/// flag so changes made mid-send trigger another report.
async fn run_state_reporter(shared: Arc<SessionShared>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = shared.report.notified() => {
                while shared.report_dirty.swap(false, Ordering::Relaxed) {
                    let report = Message::ClientState(msg::ClientState {
                        player: Some(msg::PlayerStateReport {
                            state: *shared.playback.lock(),
                            volume: shared.volume.value(),
                            muted: shared.volume.muted(),
                        }),
                    });
                    match report.to_json() {
                        Ok(json) => {
                            if shared.transport.send_text(json).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("failed to encode client/state: {e}"),
                    }
                }
            }
        }
    }
}

/// Moves scheduled chunks into the renderer at emission time.
async fn run_render_pump(shared: Arc<SessionShared>, mut rx: mpsc::Receiver<ScheduledChunk>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            chunk = rx.recv() => {
                let Some(chunk) = chunk else { break };
                let played = {
                    let mut renderer_slot = shared.renderer.lock().await;
                    match renderer_slot.as_mut() {
                        Some(renderer) => {
                            renderer.play_pcm(&chunk.pcm, chunk.deadline_us);
                            true
                        }
                        None => false,
                    }
                };
                // First playout flips the report from buffering to synchronized.
                if played {
                    let buffering = *shared.playback.lock() == msg::PlayerSyncState::Buffering;
                    if buffering {
                        shared.set_playback(msg::PlayerSyncState::Synchronized);
                    }
                }
            }
        }
    }
}
