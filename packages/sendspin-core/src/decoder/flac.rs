//! Streaming FLAC decoding.
//!
//! FLAC needs the whole stream: the metadata header (delivered out-of-band
//! in `codec_header`) followed by frames. symphonia's format reader pulls
//! from a blocking byte source, so the decoder runs on a dedicated worker
//! thread fed through a channel. The channel reader announces, through a
//! marker event, every time it has consumed all buffered input and is about
//! to block. `decode` feeds one wire frame and then drains events until the
//! matching marker arrives, which makes each call deterministic: it returns
//! exactly the PCM produced from the bytes fed so far, or nothing while the
//! decoder is still working through the metadata phase. Consumed bytes are
//! handed off to the reader and never reprocessed.

use std::io::Read;
use std::thread;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;

use crate::error::DecoderError;
use crate::format::AudioFormat;

/// Capacity of the byte channel into the worker thread.
const INPUT_CHANNEL_CAPACITY: usize = 32;

/// How long construction may spend driving the probe through the header.
const HEADER_PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

enum WorkerEvent {
    /// Decoded normalized samples.
    Pcm(Vec<i32>),
    /// The reader consumed all buffered input and is about to block. The
    /// k-th marker precedes consumption of the k-th input chunk, so after
    /// sending chunk N the caller drains events until marker N + 1.
    NeedInput,
    /// The decoder failed; the worker is exiting.
    Error(String),
}

/// Blocking `Read` over the input channel.
struct ChannelReader {
    input: mpsc::Receiver<Vec<u8>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.pending.len() {
            let _ = self.events.send(WorkerEvent::NeedInput);
            match self.input.blocking_recv() {
                Some(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                // Input closed: end of stream.
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Per-stream FLAC decoder state.
pub struct FlacDecoder {
    input_tx: Option<mpsc::Sender<Vec<u8>>>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    worker: Option<thread::JoinHandle<()>>,
    chunks_sent: u64,
    markers_seen: u64,
    /// Samples produced outside a `decode` call (normally empty).
    pending_pcm: Vec<i32>,
}

impl std::fmt::Debug for FlacDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlacDecoder")
            .field("chunks_sent", &self.chunks_sent)
            .finish_non_exhaustive()
    }
}

impl FlacDecoder {
    /// Spawns the decode worker and drives it through the stream header.
    pub async fn new(
        format: &AudioFormat,
        codec_header: Option<&[u8]>,
    ) -> Result<Self, DecoderError> {
        let header = codec_header
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DecoderError::InitFailed("flac requires a codec header".into()))?;
        // FLAC carries 16- or 24-bit samples; 16-bit needs promotion to the
        // canonical 32-bit scale.
        let shift = match format.bit_depth {
            16 => 8,
            24 => 0,
            other => {
                return Err(DecoderError::InitFailed(format!(
                    "flac at {other}-bit is not supported"
                )))
            }
        };

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader = ChannelReader {
            input: input_rx,
            events: events_tx.clone(),
            pending: Vec::new(),
            pos: 0,
        };
        let worker = thread::Builder::new()
            .name("flac-decode".into())
            .spawn(move || worker_main(reader, events_tx, shift))
            .map_err(|e| DecoderError::InitFailed(format!("spawn decode thread: {e}")))?;

        let mut decoder = Self {
            input_tx: Some(input_tx),
            events_rx,
            worker: Some(worker),
            chunks_sent: 0,
            markers_seen: 0,
            pending_pcm: Vec::new(),
        };
        match tokio::time::timeout(HEADER_PROBE_TIMEOUT, decoder.feed(header)).await {
            // Audio produced while consuming the header (unusual but legal)
            // is stashed for the first decode call.
            Ok(Ok(pcm)) => {
                decoder.pending_pcm = pcm;
                Ok(decoder)
            }
            Ok(Err(e)) => Err(DecoderError::InitFailed(e.to_string())),
            // The probe wants more data than the header holds; the header
            // must carry the complete metadata section.
            Err(_) => Err(DecoderError::InitFailed(
                "codec header did not complete the metadata phase".into(),
            )),
        }
    }

    /// Decodes one wire frame. Returns the samples produced from everything
    /// fed so far; empty while the decoder is still consuming metadata or
    /// waiting for a frame boundary.
    pub async fn decode(&mut self, payload: &[u8]) -> Result<Vec<i32>, DecoderError> {
        if payload.is_empty() {
            return Ok(std::mem::take(&mut self.pending_pcm));
        }
        let mut pcm = self.feed(payload).await?;
        if !self.pending_pcm.is_empty() {
            let mut stashed = std::mem::take(&mut self.pending_pcm);
            stashed.append(&mut pcm);
            pcm = stashed;
        }
        Ok(pcm)
    }

    /// Sends one chunk to the worker and drains events until the worker is
    /// blocked waiting for the next chunk.
    async fn feed(&mut self, chunk: &[u8]) -> Result<Vec<i32>, DecoderError> {
        let tx = self
            .input_tx
            .as_ref()
            .ok_or_else(|| DecoderError::DecodeFailed("decoder is closed".into()))?;
        tx.send(chunk.to_vec())
            .await
            .map_err(|_| DecoderError::DecodeFailed("decode thread terminated".into()))?;
        self.chunks_sent += 1;

        let mut pcm = Vec::new();
        while self.markers_seen <= self.chunks_sent {
            match self.events_rx.recv().await {
                Some(WorkerEvent::Pcm(mut samples)) => pcm.append(&mut samples),
                Some(WorkerEvent::NeedInput) => self.markers_seen += 1,
                Some(WorkerEvent::Error(e)) => return Err(DecoderError::DecodeFailed(e)),
                None => {
                    return Err(DecoderError::DecodeFailed("decode thread terminated".into()))
                }
            }
        }
        Ok(pcm)
    }

    /// Closes the input stream and joins the worker.
    pub fn close(&mut self) {
        self.input_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for FlacDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_main(
    reader: ChannelReader,
    events: mpsc::UnboundedSender<WorkerEvent>,
    shift: u32,
) {
    let source = ReadOnlySource::new(reader);
    let stream = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());
    let mut hint = Hint::new();
    hint.with_extension("flac");

    let probed = match symphonia::default::get_probe().format(
        &hint,
        stream,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            let _ = events.send(WorkerEvent::Error(format!("flac probe: {e}")));
            return;
        }
    };
    let mut format = probed.format;

    let Some(track) = format.default_track() else {
        let _ = events.send(WorkerEvent::Error("flac stream has no track".into()));
        return;
    };
    let track_id = track.id;
    let mut decoder = match symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
    {
        Ok(decoder) => decoder,
        Err(e) => {
            let _ = events.send(WorkerEvent::Error(format!("flac decoder: {e}")));
            return;
        }
    };

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                let _ = events.send(WorkerEvent::Error(format!("flac read: {e}")));
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(audio) => {
                let samples = interleave(&audio, shift);
                if !samples.is_empty() {
                    let _ = events.send(WorkerEvent::Pcm(samples));
                }
            }
            // Corrupt frame: skip it and resynchronize on the next one.
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("flac frame decode error, skipping: {e}");
            }
            Err(e) => {
                let _ = events.send(WorkerEvent::Error(format!("flac decode: {e}")));
                break;
            }
        }
    }
}

/// Interleaves a decoded buffer into normalized 32-bit samples.
fn interleave(buffer: &AudioBufferRef<'_>, shift: u32) -> Vec<i32> {
    match buffer {
        AudioBufferRef::S16(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            let mut out = Vec::with_capacity(frames * channels);
            for frame in 0..frames {
                for ch in 0..channels {
                    out.push((buf.chan(ch)[frame] as i32) << 8);
                }
            }
            out
        }
        AudioBufferRef::S32(buf) => {
            let channels = buf.spec().channels.count();
            let frames = buf.frames();
            let mut out = Vec::with_capacity(frames * channels);
            for frame in 0..frames {
                for ch in 0..channels {
                    out.push(buf.chan(ch)[frame] << shift);
                }
            }
            out
        }
        _ => {
            log::warn!("flac produced an unexpected sample representation");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioCodec;

    fn flac_format(bit_depth: u8) -> AudioFormat {
        AudioFormat::new(AudioCodec::Flac, 48_000, 2, bit_depth)
    }

    /// A minimal valid FLAC stream header: magic plus a final STREAMINFO
    /// block describing 48kHz stereo 16-bit audio.
    fn streaminfo_header() -> Vec<u8> {
        let mut header = b"fLaC".to_vec();
        // Last-metadata-block flag set, type 0 (STREAMINFO), length 34.
        header.extend_from_slice(&[0x80, 0x00, 0x00, 0x22]);
        // Block sizes 4096/4096, frame sizes unknown.
        header.extend_from_slice(&4096u16.to_be_bytes());
        header.extend_from_slice(&4096u16.to_be_bytes());
        header.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        // sample_rate(20) | channels-1(3) | bits-1(5) | total_samples(36)
        let packed: u64 = (48_000u64 << 44) | (1u64 << 41) | (15u64 << 36);
        header.extend_from_slice(&packed.to_be_bytes());
        // MD5 unknown.
        header.extend_from_slice(&[0u8; 16]);
        header
    }

    #[tokio::test]
    async fn requires_a_codec_header() {
        let result = FlacDecoder::new(&flac_format(16), None).await;
        assert!(matches!(result, Err(DecoderError::InitFailed(_))));
        let result = FlacDecoder::new(&flac_format(16), Some(&[])).await;
        assert!(matches!(result, Err(DecoderError::InitFailed(_))));
    }

    #[tokio::test]
    async fn rejects_unsupported_bit_depth() {
        let header = streaminfo_header();
        let result = FlacDecoder::new(&flac_format(32), Some(&header)).await;
        assert!(matches!(result, Err(DecoderError::InitFailed(_))));
    }

    #[tokio::test]
    async fn initializes_from_streaminfo_and_closes_cleanly() {
        let header = streaminfo_header();
        let mut decoder = FlacDecoder::new(&flac_format(16), Some(&header))
            .await
            .expect("valid STREAMINFO should initialize the decoder");
        // The metadata phase produces no audio.
        assert!(decoder.pending_pcm.is_empty());
        decoder.close();
    }

    #[tokio::test]
    async fn empty_frame_produces_no_samples() {
        let header = streaminfo_header();
        let mut decoder = FlacDecoder::new(&flac_format(16), Some(&header))
            .await
            .expect("decoder should initialize");
        let samples = decoder.decode(&[]).await.expect("empty decode should succeed");
        assert!(samples.is_empty());
        decoder.close();
    }
}
