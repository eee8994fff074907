//! Framed Wire Codec (spec §4.2).
//!
//! Grounded on `original_source/include/nettalk.h` (the `reset_chunk`,
//! `init_chunk`, `noop_chunk`, `text_chunk` constants) and the parse loop in
//! `original_source/src/uncompress.c::nettalk_decode_audio`, which is the
//! literal source for the "prefix match, else 1-byte advance while
//! reset-needed" algorithm mirrored here by [`ChunkParser`].

/// Maximum chunk size on the wire: the largest AMR-NB-compatible speech frame.
pub const CHUNK_MAX: usize = 32;
/// Minimum speech-chunk size on the wire (the smallest AMR-NB-compatible mode).
pub const CHUNK_MIN: usize = 13;

const RESET_PATTERN: [u8; CHUNK_MAX] = [0xcc; CHUNK_MAX];
const INIT_PATTERN: [u8; CHUNK_MAX] = [0xdd; CHUNK_MAX];
const NOOP_PATTERN: [u8; CHUNK_MAX] = [0xee; CHUNK_MAX];
const TEXT_PREFIX: [u8; 24] = [0xff; 24];

/// Bell character used inside an 8-byte text payload to mark end-of-message.
pub const TEXT_EOM: u8 = 0x07;

/// Total wire-frame byte length (including the leading TOC byte) for each of
/// the eight AMR-NB-compatible modes, indexed by frame-type 0..=7. This is the
/// real 3GPP AMR-NB frame-size table (bits-per-frame, rounded up to bytes,
/// plus one TOC byte) — see DESIGN.md for why the codec behind it is not
/// bit-exact while this framing contract is.
pub const FRAME_LEN_BY_TYPE: [usize; 8] = [13, 14, 16, 18, 20, 21, 27, 32];

/// A parsed unit of the inner multiplexed protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Peer requests we reset our encoder.
    Reset,
    /// Sender has reset its encoder; clear decode buffer.
    Init,
    /// Keepalive; ignored semantically.
    NoOp,
    /// 8 bytes of UTF-8 text payload, zero-padded, bell-terminated.
    Text([u8; 8]),
    /// An AMR-NB-compatible frame, TOC byte included, length 13..=32.
    Speech(Vec<u8>),
}

/// Pack a TOC byte for `frame_type`. Bit 2 (`0x04`) is forced set, matching
/// `original_source/src/compress.c` (`encoder->output[output_pos] |= 0x04`),
/// which keeps a frame's leading byte from ever equalling a byte drawn purely
/// from one of the all-`0xcc`/`0xdd`/`0xee`/`0xff` control repeats.
pub fn pack_toc_byte(frame_type: u8) -> u8 {
    ((frame_type & 0x0f) << 3) | 0x04
}

/// Extract the frame-type nibble from a speech frame's TOC byte.
pub fn unpack_frame_type(toc: u8) -> u8 {
    (toc >> 3) & 0x0f
}

/// Serialize a [`Chunk`] to its wire representation.
pub fn encode(chunk: &Chunk) -> Vec<u8> {
    match chunk {
        Chunk::Reset => RESET_PATTERN.to_vec(),
        Chunk::Init => INIT_PATTERN.to_vec(),
        Chunk::NoOp => NOOP_PATTERN.to_vec(),
        Chunk::Text(payload) => {
            let mut out = Vec::with_capacity(CHUNK_MAX);
            out.extend_from_slice(&TEXT_PREFIX);
            out.extend_from_slice(payload);
            out
        }
        Chunk::Speech(frame) => frame.clone(),
    }
}

enum ParseStep {
    Chunk(Chunk),
    Advanced,
    Insufficient,
}

/// Incremental parser over a rolling byte buffer fed from the bridge.
///
/// Mirrors `nettalk_decode_audio`'s loop: a new chunk is only attempted once
/// at least [`CHUNK_MAX`] bytes are buffered (the worst case, a 32-byte
/// control chunk, must always be matchable), and while `reset_needed` is set,
/// unrecognized bytes are discarded one at a time until a Reset/Init/NoOp/Text
/// pattern or a valid speech TOC byte resynchronizes the stream.
pub struct ChunkParser {
    buf: Vec<u8>,
    reset_needed: bool,
}

impl ChunkParser {
    /// A fresh parser starts in reset-needed state, matching
    /// `decoder->reset_needed = 1` in `nettalk_audio_decoder_init`.
    pub fn new() -> Self {
        Self { buf: Vec::new(), reset_needed: true }
    }

    pub fn reset_needed(&self) -> bool {
        self.reset_needed
    }

    pub fn set_reset_needed(&mut self, needed: bool) {
        self.reset_needed = needed;
    }

    /// Append freshly read bytes to the rolling buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn consume(&mut self, n: usize) {
        self.buf.drain(..n);
    }

    fn try_parse_one(&mut self) -> ParseStep {
        if self.buf.len() < CHUNK_MAX {
            return ParseStep::Insufficient;
        }

        if self.buf[..CHUNK_MAX] == RESET_PATTERN {
            self.consume(CHUNK_MAX);
            return ParseStep::Chunk(Chunk::Reset);
        }
        if self.buf[..CHUNK_MAX] == NOOP_PATTERN {
            self.consume(CHUNK_MAX);
            return ParseStep::Chunk(Chunk::NoOp);
        }
        if self.buf[..CHUNK_MAX] == INIT_PATTERN {
            self.consume(CHUNK_MAX);
            self.reset_needed = false;
            return ParseStep::Chunk(Chunk::Init);
        }
        if self.buf[..24] == TEXT_PREFIX {
            let mut payload = [0u8; 8];
            payload.copy_from_slice(&self.buf[24..CHUNK_MAX]);
            self.consume(CHUNK_MAX);
            return ParseStep::Chunk(Chunk::Text(payload));
        }

        if self.reset_needed {
            self.consume(1);
            return ParseStep::Advanced;
        }

        let ft = unpack_frame_type(self.buf[0]);
        let len = match FRAME_LEN_BY_TYPE.get(ft as usize) {
            Some(&l) => l,
            None => {
                self.consume(1);
                return ParseStep::Advanced;
            }
        };
        let frame = self.buf[..len].to_vec();
        self.consume(len);
        ParseStep::Chunk(Chunk::Speech(frame))
    }

    /// Drain as many complete chunks as the current buffer allows.
    pub fn drain(&mut self) -> Vec<Chunk> {
        let mut out = Vec::new();
        loop {
            match self.try_parse_one() {
                ParseStep::Chunk(c) => out.push(c),
                ParseStep::Advanced => continue,
                ParseStep::Insufficient => break,
            }
        }
        out
    }
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_control_and_text_chunks() {
        let mut parser = ChunkParser::new();
        parser.set_reset_needed(false);

        let chunks = vec![
            Chunk::Reset,
            Chunk::Init,
            Chunk::NoOp,
            Chunk::Text(*b"hi\x07\0\0\0\0\0"),
        ];
        for c in &chunks {
            parser.feed(&encode(c));
        }

        let parsed = parser.drain();
        assert_eq!(parsed, chunks);
    }

    #[test]
    fn round_trip_speech_frames_of_every_mode() {
        let mut parser = ChunkParser::new();
        parser.set_reset_needed(false);

        let mut expected = Vec::new();
        for ft in 0u8..8 {
            let len = FRAME_LEN_BY_TYPE[ft as usize];
            let mut frame = vec![0xabu8; len];
            frame[0] = pack_toc_byte(ft);
            expected.push(Chunk::Speech(frame.clone()));
            parser.feed(&frame);
        }

        let parsed = parser.drain();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn reset_needed_resynchronizes_one_byte_at_a_time() {
        let mut parser = ChunkParser::new();
        assert!(parser.reset_needed());

        // 40 bytes of garbage, then a valid Init chunk.
        let mut data = vec![0x11u8; 40];
        data.extend_from_slice(&encode(&Chunk::Init));
        parser.feed(&data);

        let parsed = parser.drain();
        assert_eq!(parsed, vec![Chunk::Init]);
        assert!(!parser.reset_needed());
    }

    #[test]
    fn garbage_before_init_does_not_desync_more_than_one_chunk() {
        // S2 scenario shape: valid frames, garbage, valid frames resume after Init.
        let mut parser = ChunkParser::new();
        parser.set_reset_needed(false);

        let valid = {
            let mut f = vec![0xabu8; FRAME_LEN_BY_TYPE[7]];
            f[0] = pack_toc_byte(7);
            f
        };
        parser.feed(&valid);
        let first = parser.drain();
        assert_eq!(first, vec![Chunk::Speech(valid.clone())]);

        // Decoder faults, flips to reset-needed (simulated by caller), then
        // garbage must resync before the next valid chunk is accepted.
        parser.set_reset_needed(true);
        let mut garbage = vec![0x42u8; 33];
        garbage.extend_from_slice(&encode(&Chunk::Init));
        garbage.extend_from_slice(&valid);
        parser.feed(&garbage);

        let parsed = parser.drain();
        assert_eq!(parsed, vec![Chunk::Init, Chunk::Speech(valid)]);
    }
}
