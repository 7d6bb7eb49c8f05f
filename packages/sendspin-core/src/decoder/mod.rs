//! Codec-specific streaming decode into the canonical sample format.
//!
//! Every variant turns wire frames into interleaved normalized 32-bit
//! signed samples: 16-bit sources are shifted left 8, 24-bit sources are
//! sign-extended, 32-bit sources pass through. The renderer speaks only
//! this internal format; conversion happens exactly twice, at decode-in and
//! device-out.

mod flac;
mod opus;
mod pcm;

pub use flac::FlacDecoder;
pub use opus::OpusDecoder;
pub use pcm::PcmDecoder;

use bytes::Bytes;

use crate::error::DecoderError;
use crate::format::{AudioCodec, AudioFormat};

/// Per-stream decoder state, constructed explicitly for the negotiated
/// format at stream start and destroyed at stream end or format change.
#[derive(Debug)]
pub enum Decoder {
    Pcm(PcmDecoder),
    Opus(OpusDecoder),
    Flac(FlacDecoder),
}

impl Decoder {
    /// Constructs the variant for the negotiated format.
    pub async fn new(
        format: &AudioFormat,
        codec_header: Option<&[u8]>,
    ) -> Result<Self, DecoderError> {
        match format.codec {
            AudioCodec::Pcm => Ok(Self::Pcm(PcmDecoder::new(format.bit_depth)?)),
            AudioCodec::Opus => Ok(Self::Opus(OpusDecoder::new(
                format.sample_rate,
                format.channels,
            )?)),
            AudioCodec::Flac => Ok(Self::Flac(FlacDecoder::new(format, codec_header).await?)),
        }
    }

    /// Decodes one wire frame into normalized samples. An empty result is
    /// valid: the codec may need more input before producing audio.
    pub async fn decode(&mut self, payload: &[u8]) -> Result<Vec<i32>, DecoderError> {
        match self {
            Self::Pcm(decoder) => decoder.decode(payload),
            Self::Opus(decoder) => decoder.decode(payload),
            Self::Flac(decoder) => decoder.decode(payload).await,
        }
    }

    /// Releases codec resources. Only FLAC holds any (its worker thread).
    pub fn close(&mut self) {
        if let Self::Flac(decoder) = self {
            decoder.close();
        }
    }
}

/// Packs normalized samples into the byte form carried by scheduled chunks.
#[must_use]
pub fn samples_to_bytes(samples: &[i32]) -> Bytes {
    Bytes::copy_from_slice(bytemuck::cast_slice(samples))
}

/// Reads scheduled-chunk bytes back as normalized samples.
pub fn bytes_to_samples(bytes: &[u8]) -> impl Iterator<Item = i32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}
