//! Player configuration.
//!
//! Maps CLI arguments and environment overrides onto the core client
//! configuration.

use sendspin_core::{ClientConfig, PlayerConfig, Role};

/// Resolved player settings.
#[derive(Debug)]
pub struct PlayerSettings {
    /// Server WebSocket URL (e.g. `ws://192.168.1.10:8927/sendspin`).
    pub url: String,

    /// Bearer token, when the server requires authentication.
    pub auth_token: Option<String>,

    /// Stable client id; generated and logged when not provided.
    pub client_id: Option<String>,

    /// Human-readable player name; defaults to the hostname.
    pub display_name: Option<String>,

    /// Initial volume, 0-100.
    pub volume: u8,

    /// Seconds to wait before reconnecting after a lost connection.
    pub reconnect_secs: u64,
}

impl PlayerSettings {
    /// Builds the core client configuration from these settings.
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            roles: vec![Role::Player, Role::Metadata, Role::Artwork],
            player: Some(PlayerConfig::default()),
            auth_token: self.auth_token.clone(),
            ..ClientConfig::default()
        };
        if let Some(client_id) = &self.client_id {
            config.client_id = client_id.clone();
        }
        if let Some(name) = &self.display_name {
            config.display_name = name.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PlayerSettings {
        PlayerSettings {
            url: "ws://localhost:8927".into(),
            auth_token: None,
            client_id: Some("player-1".into()),
            display_name: Some("Living Room".into()),
            volume: 80,
            reconnect_secs: 3,
        }
    }

    #[test]
    fn explicit_identity_is_used() {
        let config = settings().to_client_config();
        assert_eq!(config.client_id, "player-1");
        assert_eq!(config.display_name, "Living Room");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_identity_falls_back_to_generated_values() {
        let mut s = settings();
        s.client_id = None;
        s.display_name = None;
        let config = s.to_client_config();
        assert!(!config.client_id.is_empty());
        assert!(!config.display_name.is_empty());
    }
}
