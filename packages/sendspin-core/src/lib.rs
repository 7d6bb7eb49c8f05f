//! Sendspin Core - client library for synchronized multi-room audio.
//!
//! This crate implements the Sendspin player client core: it connects to a
//! server over a persistent WebSocket, keeps the local clock synchronized to
//! the server's loop time, and renders the timestamped audio stream at
//! locally computed deadlines so that every client of the same server plays
//! the same sample at the same wall-clock instant.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: Connection lifecycle, handshake, message dispatch
//! - [`transport`]: Framed WebSocket channel (text control / binary media)
//! - [`clock`]: NTP-style offset and drift estimation
//! - [`scheduler`]: Deadline-ordered jitter buffer with a periodic ticker
//! - [`decoder`]: PCM / Opus / FLAC decode into a canonical sample format
//! - [`renderer`]: Device output, volume, and the bounded buffer ledger
//! - [`protocol`]: Wire schema for control messages and binary frames
//! - [`events`]: Events surfaced to the embedder
//! - [`state`]: Configuration
//! - [`error`]: Centralized error types
//!
//! The embedder owns one [`SendspinClient`] per connection, subscribes to
//! [`ClientEvent`]s, and drives `connect`/`disconnect`. Everything in
//! between - probing, scheduling, decoding, rendering - runs on the
//! session's internal tasks.

#![warn(clippy::all)]

pub mod clock;
pub mod decoder;
pub mod error;
pub mod events;
pub mod format;
pub mod protocol;
pub mod protocol_constants;
pub mod renderer;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod time;
pub mod transport;

// Re-export commonly used types at the crate root
pub use clock::{ClockSync, SyncQuality};
pub use error::{ClientError, ClientResult, DecoderError, DeviceError, ProtocolError, TransportError};
pub use events::{ClientEvent, GroupInfo, TrackMetadata};
pub use format::{AudioCodec, AudioFormat};
pub use protocol::{BinaryKind, BinaryMessage, Message};
pub use renderer::{BufferLedger, Renderer, VolumeState};
pub use scheduler::{ChunkScheduler, ScheduledChunk, SchedulerStats};
pub use session::{SendspinClient, SessionState};
pub use state::{ClientConfig, ClockSyncConfig, PlayerConfig, Role, SchedulerConfig};
pub use transport::WsTransport;
