//! Binary media frame codec.
//!
//! Wire layout (bit-exact): `[type: u8][server_timestamp: i64 BE][payload]`.
//! The minimum frame is 9 bytes (empty payload). Timestamps are microseconds
//! in the server's monotonic loop-time domain and must be non-negative.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::protocol_constants::{
    ARTWORK_CHANNEL_COUNT, BINARY_HEADER_LEN, BINARY_TYPE_APPLICATION_MIN,
    BINARY_TYPE_ARTWORK_BASE, BINARY_TYPE_AUDIO, BINARY_TYPE_RESERVED_MAX, BINARY_TYPE_VISUALIZER,
};

/// How a binary frame is routed after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    /// Audio chunk for the player pipeline.
    AudioChunk,
    /// Artwork payload for the given display channel (0-3).
    Artwork(u8),
    /// Visualizer data.
    Visualizer,
    /// Application-specific frame, passed through as a raw event.
    Application,
    /// Reserved or unassigned type id; dropped silently.
    Ignored,
}

/// A parsed binary media frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMessage {
    /// Frame type id (see the type allocation table).
    pub message_type: u8,
    /// Server loop time of the frame in microseconds.
    pub server_timestamp_us: i64,
    /// Frame payload; may be empty.
    pub payload: Bytes,
}

impl BinaryMessage {
    /// Parses a frame from wire bytes.
    ///
    /// Rejects frames shorter than the 9-byte header, frames with a reserved
    /// type id (0-3) and frames with a negative timestamp.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < BINARY_HEADER_LEN {
            return Err(ProtocolError::InvalidBinaryFrame(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }

        let message_type = frame[0];
        if message_type <= BINARY_TYPE_RESERVED_MAX {
            return Err(ProtocolError::InvalidBinaryFrame(format!(
                "reserved type id {message_type}"
            )));
        }

        let server_timestamp_us = i64::from_be_bytes([
            frame[1], frame[2], frame[3], frame[4], frame[5], frame[6], frame[7], frame[8],
        ]);
        if server_timestamp_us < 0 {
            return Err(ProtocolError::InvalidBinaryFrame(format!(
                "negative timestamp {server_timestamp_us}"
            )));
        }

        Ok(Self {
            message_type,
            server_timestamp_us,
            payload: Bytes::copy_from_slice(&frame[BINARY_HEADER_LEN..]),
        })
    }

    /// Encodes the frame to wire bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BINARY_HEADER_LEN + self.payload.len());
        out.push(self.message_type);
        out.extend_from_slice(&self.server_timestamp_us.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Routing class for this frame's type id.
    #[must_use]
    pub fn kind(&self) -> BinaryKind {
        match self.message_type {
            BINARY_TYPE_AUDIO => BinaryKind::AudioChunk,
            t if (BINARY_TYPE_ARTWORK_BASE..BINARY_TYPE_ARTWORK_BASE + ARTWORK_CHANNEL_COUNT)
                .contains(&t) =>
            {
                BinaryKind::Artwork(t - BINARY_TYPE_ARTWORK_BASE)
            }
            BINARY_TYPE_VISUALIZER => BinaryKind::Visualizer,
            t if t >= BINARY_TYPE_APPLICATION_MIN => BinaryKind::Application,
            _ => BinaryKind::Ignored,
        }
    }
}
