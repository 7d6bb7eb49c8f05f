//! JSON control message schema.
//!
//! Every control message has the envelope `{"type": "<name>", "payload": {...}}`
//! with snake_case payload fields. [`Message`] is an adjacently tagged enum,
//! so serde dispatches on the `type` discriminator *before* touching the
//! payload. Several payload shapes consist entirely of optional fields and
//! would happily deserialize from each other's JSON; tag-first dispatch is
//! what keeps them apart. Never try-decode payloads through a chain of
//! candidate shapes.

use serde::{Deserialize, Serialize};

use crate::format::AudioFormat;

/// Top-level protocol message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    /// Bearer-token authentication, sent before `client/hello` when a token
    /// is configured.
    #[serde(rename = "auth")]
    Auth(Auth),

    /// Server acknowledgment of `auth`.
    #[serde(rename = "auth/ok")]
    AuthOk(AuthOk),

    /// Client capability announcement.
    #[serde(rename = "client/hello")]
    ClientHello(ClientHello),

    /// Server identity and activated roles.
    #[serde(rename = "server/hello")]
    ServerHello(ServerHello),

    /// Clock sync probe.
    #[serde(rename = "client/time")]
    ClientTime(ClientTime),

    /// Clock sync probe reply.
    #[serde(rename = "server/time")]
    ServerTime(ServerTime),

    /// Stream negotiation: per-role sub-payloads describe what is about to
    /// be streamed.
    #[serde(rename = "stream/start")]
    StreamStart(StreamStart),

    /// End of the active stream.
    #[serde(rename = "stream/end")]
    StreamEnd(StreamEnd),

    /// Now-playing metadata.
    #[serde(rename = "stream/metadata")]
    StreamMetadata(StreamMetadata),

    /// Group membership and richer metadata updates.
    #[serde(rename = "session/update")]
    SessionUpdate(SessionUpdate),

    /// Server-originated player command (volume / mute).
    #[serde(rename = "server/command")]
    ServerCommand(ServerCommand),

    /// Client state report.
    #[serde(rename = "client/state")]
    ClientState(ClientState),

    /// Farewell sent on graceful disconnect so the server can distinguish a
    /// deliberate departure from a dropped connection.
    #[serde(rename = "client/goodbye")]
    ClientGoodbye(ClientGoodbye),
}

impl Message {
    /// Serializes the message to its wire JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// `auth` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    pub token: String,
    pub client_id: String,
}

/// `auth/ok` payload (empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthOk {}

/// Optional device description inside `client/hello`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

/// `player@v1` capability block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSupport {
    /// Supported formats in priority order; the server picks the first one
    /// it can source.
    pub supported_formats: Vec<AudioFormat>,
    /// Render-side buffer capacity in bytes.
    pub buffer_capacity: u64,
    /// Commands the player accepts via `server/command`.
    pub supported_commands: Vec<String>,
}

/// `client/hello` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub client_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    pub version: u32,
    pub supported_roles: Vec<String>,
    #[serde(rename = "player@v1_support", skip_serializing_if = "Option::is_none")]
    pub player_support: Option<PlayerSupport>,
}

/// `server/hello` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHello {
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub active_roles: Option<Vec<String>>,
    #[serde(default)]
    pub connection_reason: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Time Synchronization
// ─────────────────────────────────────────────────────────────────────────────

/// `client/time` payload. `client_transmitted` is the client clock in
/// microseconds at send time (t1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClientTime {
    pub client_transmitted: i64,
}

/// `server/time` payload: the echoed t1 plus the server's receive (t2) and
/// transmit (t3) loop-time stamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServerTime {
    pub client_transmitted: i64,
    pub server_received: i64,
    pub server_transmitted: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Control
// ─────────────────────────────────────────────────────────────────────────────

/// Player sub-payload of `stream/start`.
///
/// The codec arrives as a raw string: an identifier this client never
/// advertised must surface as a stream error report, not a parse failure
/// that silently drops the whole message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStartPlayer {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    /// Codec-specific header (base64). Required for FLAC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_header: Option<String>,
}

/// Artwork sub-payload of `stream/start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStartArtwork {
    #[serde(default)]
    pub channels: Vec<u8>,
}

/// `stream/start` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<StreamStartPlayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork: Option<StreamStartArtwork>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualizer: Option<serde_json::Value>,
}

/// `stream/end` payload (empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamEnd {}

/// `stream/metadata` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Updates & Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata block inside `session/update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<u32>,
    /// Track duration in microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

/// `session/update` payload. All fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_state: Option<String>,
}

/// Player command inside `server/command`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerCommand {
    /// `"volume"` or `"mute"`.
    pub command: String,
    /// Volume level 0-100 for the `volume` command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    /// Mute state for the `mute` command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

/// `server/command` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerCommand>,
}

// ─────────────────────────────────────────────────────────────────────────────
// State Reports
// ─────────────────────────────────────────────────────────────────────────────

/// Player playback state reported in `client/state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSyncState {
    /// Playing in sync with the server clock (or idle and ready).
    Synchronized,
    /// A stream started but playout has not reached steady state yet.
    Buffering,
    /// The current stream failed; the connection is still alive.
    Error,
}

/// Player block of `client/state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStateReport {
    pub state: PlayerSyncState,
    /// Volume level 0-100.
    pub volume: u8,
    pub muted: bool,
}

/// `client/state` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerStateReport>,
}

/// Reason carried in `client/goodbye`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodbyeReason {
    /// The client is shutting down.
    Shutdown,
    /// The client is restarting and will reconnect.
    Restart,
    /// The user asked to disconnect.
    UserRequest,
}

/// `client/goodbye` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientGoodbye {
    pub reason: GoodbyeReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{AudioCodec, AudioFormat};

    #[test]
    fn envelope_roundtrip() {
        let msg = Message::ClientTime(ClientTime {
            client_transmitted: 123_456,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"client/time\""));
        assert!(json.contains("\"client_transmitted\":123456"));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            Message::ClientTime(ClientTime {
                client_transmitted: 123_456
            })
        ));
    }

    #[test]
    fn client_hello_uses_versioned_capability_key() {
        let msg = Message::ClientHello(ClientHello {
            client_id: "c1".into(),
            name: "Kitchen".into(),
            device_info: None,
            version: 1,
            supported_roles: vec!["player@v1".into()],
            player_support: Some(PlayerSupport {
                supported_formats: vec![AudioFormat::new(AudioCodec::Pcm, 48_000, 2, 16)],
                buffer_capacity: 2 * 1024 * 1024,
                supported_commands: vec!["volume".into(), "mute".into()],
            }),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"player@v1_support\""));
        assert!(json.contains("\"codec\":\"pcm\""));
    }

    #[test]
    fn hello_format_order_survives_roundtrip() {
        let formats = vec![
            AudioFormat::new(AudioCodec::Pcm, 192_000, 2, 24),
            AudioFormat::new(AudioCodec::Pcm, 48_000, 2, 16),
            AudioFormat::new(AudioCodec::Opus, 48_000, 2, 16),
        ];
        let support = PlayerSupport {
            supported_formats: formats.clone(),
            buffer_capacity: 1024,
            supported_commands: vec![],
        };
        let json = serde_json::to_string(&support).unwrap();
        let back: PlayerSupport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.supported_formats, formats);
    }

    #[test]
    fn dispatch_is_driven_by_the_type_discriminator() {
        // A stream/start payload whose fields would also satisfy the
        // all-optional session/update shape must still land on StreamStart.
        let json = r#"{
            "type": "stream/start",
            "payload": {
                "player": {
                    "codec": "flac",
                    "sample_rate": 48000,
                    "channels": 2,
                    "bit_depth": 24,
                    "codec_header": "ZkxhQw=="
                }
            }
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        let Message::StreamStart(start) = msg else {
            panic!("stream/start routed to the wrong variant");
        };
        let player = start.player.unwrap();
        assert_eq!(player.codec, "flac");
        assert_eq!(player.bit_depth, 24);
    }

    #[test]
    fn session_update_with_only_group_fields_parses() {
        let json = r#"{
            "type": "session/update",
            "payload": {"group_id": "g1", "group_name": "Upstairs"}
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        let Message::SessionUpdate(update) = msg else {
            panic!("expected session/update");
        };
        assert_eq!(update.group_id.as_deref(), Some("g1"));
        assert!(update.metadata.is_none());
    }

    #[test]
    fn unknown_message_type_fails_to_parse() {
        let json = r#"{"type": "server/nonsense", "payload": {}}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn server_command_volume_parses() {
        let json = r#"{
            "type": "server/command",
            "payload": {"player": {"command": "volume", "volume": 55}}
        }"#;
        let Message::ServerCommand(cmd) = serde_json::from_str(json).unwrap() else {
            panic!("expected server/command");
        };
        let player = cmd.player.unwrap();
        assert_eq!(player.command, "volume");
        assert_eq!(player.volume, Some(55));
        assert_eq!(player.muted, None);
    }

    #[test]
    fn client_state_serializes_lowercase_states() {
        let msg = Message::ClientState(ClientState {
            player: Some(PlayerStateReport {
                state: PlayerSyncState::Buffering,
                volume: 100,
                muted: false,
            }),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"state\":\"buffering\""));
    }

    #[test]
    fn goodbye_reason_uses_snake_case() {
        let msg = Message::ClientGoodbye(ClientGoodbye {
            reason: GoodbyeReason::UserRequest,
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"client/goodbye\""));
        assert!(json.contains("\"reason\":\"user_request\""));
    }

    #[test]
    fn unknown_codec_string_still_parses_stream_start() {
        let json = r#"{
            "type": "stream/start",
            "payload": {
                "player": {"codec": "mp3", "sample_rate": 44100, "channels": 2, "bit_depth": 16}
            }
        }"#;
        let Message::StreamStart(start) = serde_json::from_str(json).unwrap() else {
            panic!("expected stream/start");
        };
        assert_eq!(start.player.unwrap().codec, "mp3");
    }
}
