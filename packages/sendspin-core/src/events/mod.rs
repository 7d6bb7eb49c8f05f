//! Event surface for embedders.
//!
//! The session distributes [`ClientEvent`]s through a `tokio::sync::broadcast`
//! channel: every subscriber gets every event, and a slow subscriber lags
//! without blocking the session. Subscribe before `connect` to observe the
//! full lifecycle.

use bytes::Bytes;

use crate::format::AudioFormat;

/// Track metadata lifted from `stream/metadata` and `session/update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    /// Track number within the album.
    pub track: Option<u32>,
    /// Track duration in microseconds.
    pub track_duration: Option<i64>,
    pub year: Option<u32>,
    pub artwork_url: Option<String>,
}

impl TrackMetadata {
    /// True when no field is populated. Empty updates are not surfaced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Sync-group info lifted from `session/update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    /// Group playback state as reported by the server
    /// (`playing` / `paused` / `stopped`).
    pub playback_state: Option<String>,
}

/// Events delivered to the embedder.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The handshake completed and the session is usable.
    ServerConnected,

    /// A stream started with the negotiated format.
    StreamStarted(AudioFormat),

    /// The active stream ended.
    StreamEnded,

    /// Sync-group membership or playback state changed.
    GroupUpdated(GroupInfo),

    /// Now-playing metadata changed.
    MetadataReceived(TrackMetadata),

    /// Artwork for one of the four display channels. An empty payload means
    /// the display should be cleared.
    ArtworkReceived {
        channel: u8,
        data: Bytes,
    },

    /// Raw visualizer data.
    VisualizerData(Bytes),

    /// An application-specific binary frame (type ids 192-255), passed
    /// through without interpretation.
    ApplicationData {
        message_type: u8,
        payload: Bytes,
    },

    /// A terminal session error; the session is disconnected.
    Error(String),
}
