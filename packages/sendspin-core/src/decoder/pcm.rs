//! Raw PCM pass-through decoding.
//!
//! Wire samples are interleaved little-endian at the negotiated bit depth.
//! Output is the canonical normalized stream: interleaved signed 32-bit with
//! 16-bit input shifted left 8, 24-bit input sign-extended, and 32-bit input
//! passed through.

use crate::error::DecoderError;

/// Per-stream PCM state. Stateless apart from the bit depth; kept as a
/// struct so all codec variants share the same construct/decode/close shape.
#[derive(Debug)]
pub struct PcmDecoder {
    bit_depth: u8,
}

impl PcmDecoder {
    /// Creates a decoder for the given bit depth (16, 24 or 32).
    pub fn new(bit_depth: u8) -> Result<Self, DecoderError> {
        if !matches!(bit_depth, 16 | 24 | 32) {
            return Err(DecoderError::InitFailed(format!(
                "unsupported pcm bit depth {bit_depth}"
            )));
        }
        Ok(Self { bit_depth })
    }

    /// Decodes one wire frame into normalized samples.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<i32>, DecoderError> {
        let bytes_per_sample = (self.bit_depth / 8) as usize;
        if payload.len() % bytes_per_sample != 0 {
            return Err(DecoderError::DecodeFailed(format!(
                "{}-byte payload is not a whole number of {}-bit samples",
                payload.len(),
                self.bit_depth
            )));
        }

        let mut out = Vec::with_capacity(payload.len() / bytes_per_sample);
        match self.bit_depth {
            16 => {
                for sample in payload.chunks_exact(2) {
                    let value = i16::from_le_bytes([sample[0], sample[1]]);
                    out.push((value as i32) << 8);
                }
            }
            24 => {
                for sample in payload.chunks_exact(3) {
                    out.push(sign_extend_24(sample[0], sample[1], sample[2]));
                }
            }
            _ => {
                for sample in payload.chunks_exact(4) {
                    out.push(i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]));
                }
            }
        }
        Ok(out)
    }
}

/// Unpacks three little-endian bytes into a sign-extended 32-bit sample.
#[inline]
fn sign_extend_24(b0: u8, b1: u8, b2: u8) -> i32 {
    // The top byte carries the sign; shifting down rebuilds it arithmetically.
    (i32::from_le_bytes([0, b0, b1, b2])) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_depth() {
        assert!(PcmDecoder::new(20).is_err());
        assert!(PcmDecoder::new(8).is_err());
    }

    #[test]
    fn decodes_16_bit_with_left_shift() {
        let mut decoder = PcmDecoder::new(16).unwrap();
        let payload = [
            0x01, 0x00, // 1
            0xFF, 0xFF, // -1
            0xFF, 0x7F, // i16::MAX
            0x00, 0x80, // i16::MIN
        ];
        assert_eq!(
            decoder.decode(&payload).unwrap(),
            vec![1 << 8, -1 << 8, (i16::MAX as i32) << 8, (i16::MIN as i32) << 8]
        );
    }

    #[test]
    fn decodes_24_bit_with_sign_extension() {
        let mut decoder = PcmDecoder::new(24).unwrap();
        let payload = [
            0x01, 0x00, 0x00, // 1
            0xFF, 0xFF, 0xFF, // -1
            0xFF, 0xFF, 0x7F, // max positive 24-bit
            0x00, 0x00, 0x80, // min negative 24-bit
        ];
        assert_eq!(
            decoder.decode(&payload).unwrap(),
            vec![1, -1, (1 << 23) - 1, -(1 << 23)]
        );
    }

    #[test]
    fn decodes_32_bit_passthrough() {
        let mut decoder = PcmDecoder::new(32).unwrap();
        let mut payload = Vec::new();
        for value in [0i32, -40_000, i32::MAX, i32::MIN] {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        assert_eq!(
            decoder.decode(&payload).unwrap(),
            vec![0, -40_000, i32::MAX, i32::MIN]
        );
    }

    #[test]
    fn stereo_interleaving_is_preserved() {
        let mut decoder = PcmDecoder::new(16).unwrap();
        // [L0, R0, L1, R1]
        let payload = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00];
        assert_eq!(
            decoder.decode(&payload).unwrap(),
            vec![1 << 8, 2 << 8, 3 << 8, 4 << 8]
        );
    }

    #[test]
    fn rejects_partial_sample() {
        let mut decoder = PcmDecoder::new(24).unwrap();
        assert!(decoder.decode(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn empty_payload_decodes_to_nothing() {
        let mut decoder = PcmDecoder::new(16).unwrap();
        assert!(decoder.decode(&[]).unwrap().is_empty());
    }
}
