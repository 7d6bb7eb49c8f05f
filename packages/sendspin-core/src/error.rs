//! Centralized error types for the Sendspin client core.
//!
//! Errors are grouped by the layer that produces them. The propagation
//! policy mirrors the session design:
//! - [`TransportError`] terminates the session.
//! - [`ProtocolError`] is non-fatal: the offending frame is logged and
//!   skipped.
//! - [`DecoderError`] and [`DeviceError`] are fatal to the current stream
//!   but the connection survives.
//! - [`ClientError`] is the umbrella type surfaced from the public API.

use thiserror::Error;

/// Errors from the framed WebSocket transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A send was attempted while the session is not open.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called on a client that already holds a live session.
    #[error("already connected")]
    AlreadyConnected,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connect or handshake deadline elapsed.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// An outgoing frame could not be serialized.
    #[error("failed to encode outgoing frame: {0}")]
    EncodingFailed(String),
}

/// Non-fatal wire-level errors. Frame handlers log these and continue;
/// they never terminate the session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A text frame carried a `type` this client does not understand.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A binary frame violated the framing contract (too short, reserved
    /// type id, negative timestamp).
    #[error("invalid binary frame: {0}")]
    InvalidBinaryFrame(String),

    /// `stream/start` negotiated a codec this client did not advertise.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// The negotiated bit depth is outside {16, 24, 32}.
    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u8),

    /// The base64 `codec_header` could not be decoded.
    #[error("invalid codec header: {0}")]
    InvalidCodecHeader(String),
}

/// Errors from codec state. Fatal to the current stream: the session moves
/// the player into the error state and reports it, but stays connected.
#[derive(Debug, Error)]
pub enum DecoderError {
    /// The decoder could not be constructed for the negotiated format.
    #[error("decoder initialization failed: {0}")]
    InitFailed(String),

    /// A wire frame could not be decoded.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
}

/// Errors from the audio output device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The output device could not be configured or started.
    #[error("failed to start audio device: {0}")]
    StartFailed(String),
}

/// Top-level error for session-fatal conditions, surfaced from the public
/// client API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport failed or timed out.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server rejected the configured auth token.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The handshake broke down before the session became usable.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The client configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenient Result alias for session-level operations.
pub type ClientResult<T> = Result<T, ClientError>;
