//! Audio format descriptions shared between the protocol and the pipeline.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Sample rates libopus accepts for decoding.
const OPUS_SAMPLE_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

/// Maximum sample rate accepted from the wire (Hz).
const MAX_SAMPLE_RATE: u32 = 384_000;

/// Codec of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// Raw interleaved little-endian PCM.
    Pcm,
    /// Opus packets, one packet per wire frame.
    Opus,
    /// FLAC stream: metadata header (via `codec_header`) followed by frames.
    Flac,
}

impl AudioCodec {
    /// Parses a wire codec identifier. Unknown identifiers are kept as an
    /// error rather than a panic so the session can report them through
    /// `client/state` without dropping the connection.
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        match name {
            "pcm" => Ok(Self::Pcm),
            "opus" => Ok(Self::Opus),
            "flac" => Ok(Self::Flac),
            other => Err(ProtocolError::UnsupportedCodec(other.to_string())),
        }
    }

    /// The wire identifier for this codec.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm => "pcm",
            Self::Opus => "opus",
            Self::Flac => "flac",
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio format negotiated for a stream.
///
/// Immutable once a stream starts; a new stream may renegotiate. Formats are
/// also advertised (in priority order) inside the `player@v1` capability
/// block of `client/hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub codec: AudioCodec,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (1 = mono, 2 = stereo).
    pub channels: u8,
    /// Bits per sample on the wire (16, 24 or 32).
    pub bit_depth: u8,
}

impl AudioFormat {
    /// Creates a new format description.
    #[must_use]
    pub fn new(codec: AudioCodec, sample_rate: u32, channels: u8, bit_depth: u8) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
            bit_depth,
        }
    }

    /// Validates the format against protocol bounds.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(ProtocolError::UnsupportedCodec(format!(
                "sample rate {} out of range",
                self.sample_rate
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ProtocolError::UnsupportedCodec(format!(
                "{} channels not supported",
                self.channels
            )));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(ProtocolError::UnsupportedBitDepth(self.bit_depth));
        }
        if self.codec == AudioCodec::Opus && !OPUS_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ProtocolError::UnsupportedCodec(format!(
                "opus cannot decode at {} Hz",
                self.sample_rate
            )));
        }
        Ok(())
    }

    /// Duration in microseconds of a buffer of normalized samples.
    ///
    /// Normalized audio is interleaved 32-bit, so one frame is
    /// `4 * channels` bytes regardless of the source bit depth.
    #[must_use]
    pub fn normalized_duration_us(&self, byte_len: usize) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        let frames = byte_len as u64 / (4 * self.channels as u64).max(1);
        (frames.saturating_mul(1_000_000) / self.sample_rate as u64) as i64
    }
}
