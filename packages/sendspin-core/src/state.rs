//! Client configuration types.
//!
//! Provides the embedder-facing configuration ([`ClientConfig`]) plus the
//! tuning blocks for the player pipeline ([`PlayerConfig`],
//! [`SchedulerConfig`], [`ClockSyncConfig`]). All fields have defaults that
//! match the protocol recommendations; `validate()` is called on connect.

use serde::{Deserialize, Serialize};

use crate::format::{AudioCodec, AudioFormat};
use crate::protocol_constants::{
    ROLE_ARTWORK, ROLE_CONTROLLER, ROLE_METADATA, ROLE_PLAYER, ROLE_VISUALIZER,
};

/// A capability role this client can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Metadata,
    Artwork,
    Visualizer,
    Controller,
}

impl Role {
    /// The versioned wire identifier for this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => ROLE_PLAYER,
            Self::Metadata => ROLE_METADATA,
            Self::Artwork => ROLE_ARTWORK,
            Self::Visualizer => ROLE_VISUALIZER,
            Self::Controller => ROLE_CONTROLLER,
        }
    }
}

/// Configuration for the player role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Render-side buffer capacity in bytes.
    pub buffer_capacity: usize,

    /// Formats this player can decode, in priority order. The server picks
    /// the first one it can source, so hi-res PCM variants belong before
    /// standard-rate PCM, and lossy codecs last.
    pub supported_formats: Vec<AudioFormat>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 2 * 1024 * 1024,
            supported_formats: vec![
                AudioFormat::new(AudioCodec::Pcm, 48_000, 2, 24),
                AudioFormat::new(AudioCodec::Pcm, 48_000, 2, 16),
                AudioFormat::new(AudioCodec::Flac, 48_000, 2, 16),
                AudioFormat::new(AudioCodec::Opus, 48_000, 2, 16),
            ],
        }
    }
}

/// Tuning for the chunk scheduler (jitter buffer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Half-width of the playback window in microseconds. A chunk is emitted
    /// within this tolerance of its deadline and dropped beyond it.
    pub playback_window_us: i64,

    /// Maximum queued chunks before the oldest is evicted.
    pub max_queue_size: usize,

    /// Tick period of the emission loop in microseconds.
    pub tick_period_us: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            playback_window_us: 50_000,
            max_queue_size: 100,
            tick_period_us: 10_000,
        }
    }
}

/// Tuning for the clock synchronizer probe cadence and filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockSyncConfig {
    /// Number of rapid probes fired right after the handshake.
    pub initial_probes: u32,

    /// Interval between the initial probes (milliseconds).
    pub initial_interval_ms: u64,

    /// Steady-state probe interval (milliseconds).
    pub steady_interval_ms: u64,

    /// Fixed filter gain applied to offset residuals.
    pub gain: f64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            initial_probes: 5,
            initial_interval_ms: 100,
            steady_interval_ms: 5_000,
            gain: 0.1,
        }
    }
}

/// Configuration for a Sendspin client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Stable per-device identifier sent in `client/hello` and `auth`.
    pub client_id: String,

    /// Human-readable name shown by servers and controllers.
    pub display_name: String,

    /// Roles to advertise. Must be non-empty; `Role::Player` requires
    /// [`ClientConfig::player`].
    pub roles: Vec<Role>,

    /// Player tuning. Required when the player role is advertised.
    #[serde(default)]
    pub player: Option<PlayerConfig>,

    /// Optional bearer token; when set, `auth` precedes `client/hello`.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Scheduler tuning.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Clock sync tuning.
    #[serde(default)]
    pub clock_sync: ClockSyncConfig,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            display_name: default_display_name(),
            roles: vec![Role::Player, Role::Metadata, Role::Artwork],
            player: Some(PlayerConfig::default()),
            auth_token: None,
            scheduler: SchedulerConfig::default(),
            clock_sync: ClockSyncConfig::default(),
            event_channel_capacity: 100,
        }
    }
}

impl ClientConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.is_empty() {
            return Err("client_id must not be empty".to_string());
        }
        if self.display_name.is_empty() {
            return Err("display_name must not be empty".to_string());
        }
        if self.roles.is_empty() {
            return Err("at least one role must be advertised".to_string());
        }
        if self.roles.contains(&Role::Player) {
            let player = self
                .player
                .as_ref()
                .ok_or_else(|| "player role requires a player config".to_string())?;
            if player.supported_formats.is_empty() {
                return Err("player config must list at least one format".to_string());
            }
            if player.buffer_capacity == 0 {
                return Err("buffer_capacity must be >= 1 byte".to_string());
            }
            for format in &player.supported_formats {
                format.validate().map_err(|e| e.to_string())?;
            }
        }
        if self.scheduler.playback_window_us <= 0 {
            return Err("playback_window_us must be positive".to_string());
        }
        if self.scheduler.max_queue_size == 0 {
            return Err("max_queue_size must be >= 1".to_string());
        }
        if self.scheduler.tick_period_us == 0 {
            return Err("tick_period_us must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.clock_sync.gain) || self.clock_sync.gain == 0.0 {
            return Err("clock sync gain must be in (0, 1]".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be >= 1 (broadcast::channel panics on 0)"
                .to_string());
        }
        Ok(())
    }
}

/// Default display name: the machine hostname, falling back to a fixed name
/// when the hostname cannot be read.
fn default_display_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "Sendspin Player".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn default_formats_prefer_hires_pcm_over_lossy() {
        let player = PlayerConfig::default();
        assert_eq!(player.supported_formats[0].codec, AudioCodec::Pcm);
        assert_eq!(player.supported_formats[0].bit_depth, 24);
        assert_eq!(
            player.supported_formats.last().unwrap().codec,
            AudioCodec::Opus
        );
    }

    #[test]
    fn player_role_requires_player_config() {
        let config = ClientConfig {
            player: None,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_roles() {
        let config = ClientConfig {
            roles: vec![],
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_scheduler_values() {
        let mut config = ClientConfig::default();
        config.scheduler.max_queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_gain() {
        let mut config = ClientConfig::default();
        config.clock_sync.gain = 1.5;
        assert!(config.validate().is_err());
        config.clock_sync.gain = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn role_wire_identifiers_are_versioned() {
        assert_eq!(Role::Player.as_str(), "player@v1");
        assert_eq!(Role::Controller.as_str(), "controller@v1");
    }
}
