//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the Sendspin wire protocol and changing them
//! would break interoperability with servers and other clients.

// ─────────────────────────────────────────────────────────────────────────────
// Protocol Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Protocol version advertised in `client/hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Versioned role identifiers. Roles are expressed as `name@version` strings
/// on the wire; the server activates a subset in `server/hello`.
pub const ROLE_PLAYER: &str = "player@v1";
pub const ROLE_METADATA: &str = "metadata@v1";
pub const ROLE_ARTWORK: &str = "artwork@v1";
pub const ROLE_VISUALIZER: &str = "visualizer@v1";
pub const ROLE_CONTROLLER: &str = "controller@v1";

// ─────────────────────────────────────────────────────────────────────────────
// Binary Frame Format
// ─────────────────────────────────────────────────────────────────────────────

/// Binary frame header: `[type: u8][server_timestamp: i64 big-endian]`.
/// A frame shorter than this is malformed.
pub const BINARY_HEADER_LEN: usize = 9;

/// Highest reserved type id. Frames with type 0-3 are rejected outright.
pub const BINARY_TYPE_RESERVED_MAX: u8 = 3;

/// Audio chunk for the player role.
pub const BINARY_TYPE_AUDIO: u8 = 4;

/// First artwork type id; channels 0-3 map to ids 8-11.
pub const BINARY_TYPE_ARTWORK_BASE: u8 = 8;

/// Number of artwork channels.
pub const ARTWORK_CHANNEL_COUNT: u8 = 4;

/// Visualizer data frames.
pub const BINARY_TYPE_VISUALIZER: u8 = 16;

/// Start of the application-specific range (192-255). These frames are not
/// interpreted by the core; they are surfaced to the embedder as raw events.
pub const BINARY_TYPE_APPLICATION_MIN: u8 = 192;

// ─────────────────────────────────────────────────────────────────────────────
// Handshake Timing
// ─────────────────────────────────────────────────────────────────────────────

/// Transport connect timeout (seconds). Fail fast on unreachable servers.
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Full handshake deadline (seconds): connect + auth + `server/hello`.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Grace period after `auth/ok` before assuming the server omits
/// `server/hello` (milliseconds). Some servers authenticate and start
/// streaming without ever sending a hello.
pub const SERVER_HELLO_GRACE_MS: u64 = 1_000;

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the per-direction frame channels between the socket tasks and
/// the session. Bounded so a stalled consumer applies backpressure instead of
/// buffering without limit.
pub const FRAME_CHANNEL_CAPACITY: usize = 64;
