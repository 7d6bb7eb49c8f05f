//! Opus decoding: one wire frame carries exactly one Opus packet.

use crate::error::DecoderError;

/// Largest decoded frame libopus can produce: 60 ms at 48 kHz.
const MAX_FRAME_SAMPLES_PER_CHANNEL: usize = 5760;

/// Per-stream Opus decoder state.
pub struct OpusDecoder {
    decoder: opus::Decoder,
    channels: usize,
}

impl std::fmt::Debug for OpusDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpusDecoder")
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl OpusDecoder {
    /// Creates a decoder for the negotiated rate and channel count. libopus
    /// only decodes at 8, 12, 16, 24 or 48 kHz.
    pub fn new(sample_rate: u32, channels: u8) -> Result<Self, DecoderError> {
        let opus_channels = match channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            other => {
                return Err(DecoderError::InitFailed(format!(
                    "{other} channels not supported by opus"
                )))
            }
        };
        let decoder = opus::Decoder::new(sample_rate, opus_channels)
            .map_err(|e| DecoderError::InitFailed(format!("opus: {e}")))?;
        Ok(Self {
            decoder,
            channels: channels as usize,
        })
    }

    /// Decodes one packet into normalized samples. Opus produces 16-bit
    /// output, promoted to the canonical scale by a left shift of 8.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<i32>, DecoderError> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        let mut buffer = vec![0i16; MAX_FRAME_SAMPLES_PER_CHANNEL * self.channels];
        let samples_per_channel = self
            .decoder
            .decode(payload, &mut buffer, false)
            .map_err(|e| DecoderError::DecodeFailed(format!("opus: {e}")))?;
        buffer.truncate(samples_per_channel * self.channels);
        Ok(buffer.into_iter().map(|s| (s as i32) << 8).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_sample_rate() {
        assert!(OpusDecoder::new(44_100, 2).is_err());
    }

    #[test]
    fn rejects_too_many_channels() {
        assert!(OpusDecoder::new(48_000, 6).is_err());
    }

    #[test]
    fn empty_payload_decodes_to_nothing() {
        let mut decoder = OpusDecoder::new(48_000, 2).unwrap();
        assert!(decoder.decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn roundtrips_an_encoded_packet() {
        let mut encoder =
            opus::Encoder::new(48_000, opus::Channels::Stereo, opus::Application::Audio).unwrap();
        // 20ms of a quiet ramp at 48kHz stereo.
        let frame: Vec<i16> = (0..960 * 2).map(|i| (i % 128) as i16).collect();
        let packet = encoder.encode_vec(&frame, 4000).unwrap();

        let mut decoder = OpusDecoder::new(48_000, 2).unwrap();
        let samples = decoder.decode(&packet).unwrap();
        assert_eq!(samples.len(), 960 * 2, "one 20ms stereo frame expected");
    }

    #[test]
    fn malformed_packet_is_a_decode_error() {
        let mut decoder = OpusDecoder::new(48_000, 2).unwrap();
        // A one-byte code-3 packet is invalid: the frame count byte is missing.
        let result = decoder.decode(&[0x03]);
        assert!(matches!(result, Err(DecoderError::DecodeFailed(_))));
    }
}
