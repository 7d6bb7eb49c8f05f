//! Sendspin Player - headless reference player.
//!
//! Connects to a Sendspin server, plays the synchronized audio stream on
//! the default output device and logs stream events. Designed for
//! deployments without a UI: a Raspberry Pi next to an amplifier, a test
//! bench, or a systemd service.

mod config;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sendspin_core::{ClientEvent, SendspinClient};
use tokio::signal;

use crate::config::PlayerSettings;

/// Sendspin Player - synchronized multi-room audio client.
#[derive(Parser, Debug)]
#[command(name = "sendspin-player")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL (e.g. ws://192.168.1.10:8927/sendspin).
    #[arg(env = "SENDSPIN_URL")]
    url: String,

    /// Bearer token for servers that require authentication.
    #[arg(short, long, env = "SENDSPIN_TOKEN")]
    token: Option<String>,

    /// Stable client id (generated when omitted).
    #[arg(long, env = "SENDSPIN_CLIENT_ID")]
    client_id: Option<String>,

    /// Player name shown by the server (defaults to the hostname).
    #[arg(short, long, env = "SENDSPIN_NAME")]
    name: Option<String>,

    /// Initial volume, 0-100.
    #[arg(short, long, default_value_t = 100)]
    volume: u8,

    /// Seconds to wait before reconnecting after a lost connection.
    #[arg(long, default_value_t = 3)]
    reconnect_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tracing::info!("Sendspin Player v{}", env!("CARGO_PKG_VERSION"));

    let settings = PlayerSettings {
        url: args.url,
        auth_token: args.token,
        client_id: args.client_id,
        display_name: args.name,
        volume: args.volume.min(100),
        reconnect_secs: args.reconnect_secs,
    };
    let client_config = settings.to_client_config();
    tracing::info!(client_id = %client_config.client_id, name = %client_config.display_name, "player identity");

    let client = SendspinClient::new(client_config).context("invalid configuration")?;

    tokio::select! {
        _ = run_player(&client, &settings) => {}
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }
    client.disconnect().await;
    Ok(())
}

/// Connects and pumps events, reconnecting with a fresh session whenever
/// the connection drops.
async fn run_player(client: &SendspinClient, settings: &PlayerSettings) {
    loop {
        let mut events = client.subscribe();
        match client.connect(&settings.url).await {
            Ok(()) => {
                client.set_volume(settings.volume as f32 / 100.0).await;
                tracing::info!(url = %settings.url, "connected");
                pump_events(&mut events).await;
                // The event stream only returns on a terminal error.
                client.disconnect().await;
            }
            Err(e) => {
                tracing::warn!("connect failed: {e}");
            }
        }
        tracing::info!(
            "reconnecting in {}s",
            settings.reconnect_secs
        );
        tokio::time::sleep(Duration::from_secs(settings.reconnect_secs)).await;
    }
}

/// Logs events until the session hits a terminal error.
async fn pump_events(events: &mut tokio::sync::broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::ServerConnected) => tracing::info!("server connected"),
            Ok(ClientEvent::StreamStarted(format)) => tracing::info!(
                codec = %format.codec,
                sample_rate = format.sample_rate,
                channels = format.channels,
                bit_depth = format.bit_depth,
                "stream started"
            ),
            Ok(ClientEvent::StreamEnded) => tracing::info!("stream ended"),
            Ok(ClientEvent::MetadataReceived(track)) => tracing::info!(
                title = track.title.as_deref().unwrap_or("-"),
                artist = track.artist.as_deref().unwrap_or("-"),
                album = track.album.as_deref().unwrap_or("-"),
                "now playing"
            ),
            Ok(ClientEvent::GroupUpdated(group)) => tracing::info!(
                group = group.group_name.as_deref().unwrap_or("-"),
                state = group.playback_state.as_deref().unwrap_or("-"),
                "group updated"
            ),
            Ok(ClientEvent::ArtworkReceived { channel, data }) => {
                tracing::debug!(channel, bytes = data.len(), "artwork received");
            }
            Ok(ClientEvent::VisualizerData(data)) => {
                tracing::trace!(bytes = data.len(), "visualizer data");
            }
            Ok(ClientEvent::ApplicationData { message_type, payload }) => {
                tracing::debug!(message_type, bytes = payload.len(), "application frame");
            }
            Ok(ClientEvent::Error(message)) => {
                tracing::error!("session error: {message}");
                return;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
