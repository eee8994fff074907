//! AMR-NB-compatible speech codec (spec §4.6, §GLOSSARY).
//!
//! Grounded on `original_source/src/compress.c`/`uncompress.c` for the
//! surrounding contract (160-sample/20 ms windows at 8 kHz, mode-to-frame-size
//! table, `AMREncodeReset`/`Speech_Decode_Frame_reset` on resync) and on
//! `original_source/include/sound.h` for `AMRNB_SAMPLES_MAX = 160`. The
//! reference codec itself (`gsmamr_enc`/`gsmamr_dec`) is an external
//! fixed-point ACELP library this crate does not reimplement — see
//! DESIGN.md, Open Question 5. What's implemented here is a short-term
//! linear-predictive coder (Levinson-Durbin order 2) with a scalar residual
//! quantizer sized to fit each mode's real wire frame length exactly.

use crate::wire::{pack_toc_byte, unpack_frame_type, FRAME_LEN_BY_TYPE};

pub const SAMPLES_PER_FRAME: usize = 160;
const LPC_ORDER: usize = 2;
const COEFF_SHIFT: i32 = 5; // coefficients are stored as value * 2^COEFF_SHIFT, clamped to i8

/// One of the eight AMR-NB bitrate modes, by 3GPP name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmrMode {
    Mr475 = 0,
    Mr515 = 1,
    Mr590 = 2,
    Mr670 = 3,
    Mr740 = 4,
    Mr795 = 5,
    Mr1020 = 6,
    Mr1220 = 7,
}

impl AmrMode {
    pub fn from_bitrate(bps: u32) -> Self {
        match bps {
            4750 => AmrMode::Mr475,
            5150 => AmrMode::Mr515,
            5900 => AmrMode::Mr590,
            6700 => AmrMode::Mr670,
            7400 => AmrMode::Mr740,
            7950 => AmrMode::Mr795,
            10200 => AmrMode::Mr1020,
            12200 => AmrMode::Mr1220,
            _ => AmrMode::Mr795, // matches compress.c's `default: AMR_795`
        }
    }

    pub fn frame_type(self) -> u8 {
        self as u8
    }

    pub fn from_frame_type(ft: u8) -> Option<Self> {
        match ft {
            0 => Some(AmrMode::Mr475),
            1 => Some(AmrMode::Mr515),
            2 => Some(AmrMode::Mr590),
            3 => Some(AmrMode::Mr670),
            4 => Some(AmrMode::Mr740),
            5 => Some(AmrMode::Mr795),
            6 => Some(AmrMode::Mr1020),
            7 => Some(AmrMode::Mr1220),
            _ => None,
        }
    }

    pub fn frame_len(self) -> usize {
        FRAME_LEN_BY_TYPE[self as usize]
    }
}

impl Default for AmrMode {
    fn default() -> Self {
        AmrMode::Mr1220
    }
}

/// A speech codec operating on 20 ms / 160-sample windows, mapping to and
/// from the wire's AMR-NB-compatible frame format.
pub trait SpeechCodec: Send {
    fn encode(&mut self, pcm: &[i16; SAMPLES_PER_FRAME]) -> Vec<u8>;
    fn decode(&mut self, frame: &[u8]) -> Option<[i16; SAMPLES_PER_FRAME]>;
    fn reset(&mut self);
    fn mode(&self) -> AmrMode;
}

pub struct AmrNbCodec {
    mode: AmrMode,
    encode_history: [i16; LPC_ORDER],
    decode_history: [i16; LPC_ORDER],
}

impl AmrNbCodec {
    pub fn new(mode: AmrMode) -> Self {
        Self { mode, encode_history: [0; LPC_ORDER], decode_history: [0; LPC_ORDER] }
    }

    fn payload_layout(&self) -> (usize, usize, usize) {
        let frame_len = self.mode.frame_len();
        let available = frame_len - 1; // minus TOC byte
        let coeff_bytes = LPC_ORDER; // one i8 per coefficient
        let scale_bytes = 1;
        let residual_bytes = available.saturating_sub(coeff_bytes + scale_bytes);
        (coeff_bytes, scale_bytes, residual_bytes)
    }
}

fn autocorrelate(samples: &[i16; SAMPLES_PER_FRAME], lag: usize) -> f64 {
    let mut sum = 0.0f64;
    for n in lag..SAMPLES_PER_FRAME {
        sum += samples[n] as f64 * samples[n - lag] as f64;
    }
    sum
}

/// Order-2 Levinson-Durbin recursion, returning `(c1, c2)` such that
/// `x[n] ≈ c1*x[n-1] + c2*x[n-2]`.
fn levinson_durbin_order2(samples: &[i16; SAMPLES_PER_FRAME]) -> (f64, f64) {
    let r0 = autocorrelate(samples, 0);
    if r0 <= 0.0 {
        return (0.0, 0.0);
    }
    let r1 = autocorrelate(samples, 1);
    let r2 = autocorrelate(samples, 2);

    let k1 = -r1 / r0;
    let a1_1 = k1;
    let e1 = r0 * (1.0 - k1 * k1);
    if e1.abs() < 1e-9 {
        return (-a1_1, 0.0);
    }

    let k2 = -(r2 + a1_1 * r1) / e1;
    let a2_1 = a1_1 + k2 * a1_1;
    let a2_2 = k2;

    (-a2_1, -a2_2)
}

fn quantize_coeff(c: f64) -> i8 {
    let scaled = (c * (1i32 << COEFF_SHIFT) as f64).round();
    scaled.clamp(i8::MIN as f64, i8::MAX as f64) as i8
}

fn predict(c1: i8, c2: i8, h1: i16, h2: i16) -> i32 {
    (c1 as i32 * h1 as i32 + c2 as i32 * h2 as i32) >> COEFF_SHIFT
}

struct BitWriter<'a> {
    buf: &'a mut [u8],
    bit_pos: usize,
}

impl<'a> BitWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, bit_pos: 0 }
    }

    fn write(&mut self, value: u32, nbits: u32) {
        for i in (0..nbits).rev() {
            if self.bit_pos / 8 >= self.buf.len() {
                return;
            }
            let bit = (value >> i) & 1;
            let byte_idx = self.bit_pos / 8;
            let bit_idx = 7 - (self.bit_pos % 8);
            self.buf[byte_idx] |= (bit as u8) << bit_idx;
            self.bit_pos += 1;
        }
    }
}

struct BitReader<'a> {
    buf: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, bit_pos: 0 }
    }

    fn read(&mut self, nbits: u32) -> u32 {
        let mut value = 0u32;
        for _ in 0..nbits {
            let byte_idx = self.bit_pos / 8;
            let bit = if byte_idx < self.buf.len() {
                let bit_idx = 7 - (self.bit_pos % 8);
                (self.buf[byte_idx] >> bit_idx) & 1
            } else {
                0
            };
            value = (value << 1) | bit as u32;
            self.bit_pos += 1;
        }
        value
    }
}

fn sign_extend(value: u32, nbits: u32) -> i32 {
    let shift = 32 - nbits;
    ((value << shift) as i32) >> shift
}

impl SpeechCodec for AmrNbCodec {
    fn encode(&mut self, pcm: &[i16; SAMPLES_PER_FRAME]) -> Vec<u8> {
        let (c1f, c2f) = levinson_durbin_order2(pcm);
        let c1 = quantize_coeff(c1f);
        let c2 = quantize_coeff(c2f);

        let mut h1 = self.encode_history[0];
        let mut h2 = self.encode_history[1];

        let mut residuals = [0i32; SAMPLES_PER_FRAME];
        let mut max_abs: i32 = 1;
        for n in 0..SAMPLES_PER_FRAME {
            let predicted = predict(c1, c2, h1, h2);
            let residual = pcm[n] as i32 - predicted;
            residuals[n] = residual;
            max_abs = max_abs.max(residual.abs());
            h2 = h1;
            h1 = pcm[n];
        }
        self.encode_history = [h1, h2];

        let (coeff_bytes, scale_bytes, residual_bytes) = self.payload_layout();
        let frame_len = self.mode.frame_len();
        let mut out = vec![0u8; frame_len];
        out[0] = pack_toc_byte(self.mode.frame_type());
        out[1] = c1 as u8;
        if coeff_bytes > 1 {
            out[2] = c2 as u8;
        }

        let scale = (max_abs.min(32767 * 64) / 64).clamp(1, 255) as u8;
        let scale_offset = 1 + coeff_bytes;
        out[scale_offset] = scale;

        let bits_budget = residual_bytes * 8;
        let bits_per_sample = (bits_budget / SAMPLES_PER_FRAME) as u32;

        if bits_per_sample > 0 {
            let step = (scale as i32 * 64).max(1) / (1i32 << (bits_per_sample - 1));
            let step = step.max(1);
            let half_range = 1i32 << (bits_per_sample - 1);
            let residual_start = scale_offset + scale_bytes;
            let mut writer = BitWriter::new(&mut out[residual_start..]);
            for &r in residuals.iter() {
                let level = (r / step).clamp(-half_range, half_range - 1);
                writer.write((level as u32) & ((1u32 << bits_per_sample) - 1), bits_per_sample);
            }
        }

        out
    }

    fn decode(&mut self, frame: &[u8]) -> Option<[i16; SAMPLES_PER_FRAME]> {
        if frame.is_empty() {
            return None;
        }
        let ft = unpack_frame_type(frame[0]);
        let mode = AmrMode::from_frame_type(ft)?;
        if frame.len() != mode.frame_len() {
            return None;
        }

        let saved_mode = self.mode;
        self.mode = mode;
        let (coeff_bytes, scale_bytes, residual_bytes) = self.payload_layout();
        self.mode = saved_mode;

        let c1 = frame[1] as i8;
        let c2 = if coeff_bytes > 1 { frame[2] as i8 } else { 0 };
        let scale_offset = 1 + coeff_bytes;
        let scale = frame[scale_offset] as i32;

        let bits_budget = residual_bytes * 8;
        let bits_per_sample = (bits_budget / SAMPLES_PER_FRAME) as u32;

        let mut h1 = self.decode_history[0];
        let mut h2 = self.decode_history[1];
        let mut out = [0i16; SAMPLES_PER_FRAME];

        let residual_start = scale_offset + scale_bytes;
        let mut reader = BitReader::new(&frame[residual_start..]);
        let step = if bits_per_sample > 0 {
            ((scale * 64).max(1) / (1i32 << (bits_per_sample - 1))).max(1)
        } else {
            0
        };

        for n in 0..SAMPLES_PER_FRAME {
            let predicted = predict(c1, c2, h1, h2);
            let residual = if bits_per_sample > 0 {
                let raw = reader.read(bits_per_sample);
                sign_extend(raw, bits_per_sample) * step
            } else {
                0
            };
            let sample = (predicted + residual).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            out[n] = sample;
            h2 = h1;
            h1 = sample;
        }
        self.decode_history = [h1, h2];

        Some(out)
    }

    fn reset(&mut self) {
        self.encode_history = [0; LPC_ORDER];
        self.decode_history = [0; LPC_ORDER];
    }

    fn mode(&self) -> AmrMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_produces_its_exact_wire_length() {
        for ft in 0u8..8 {
            let mode = AmrMode::from_frame_type(ft).unwrap();
            let mut codec = AmrNbCodec::new(mode);
            let pcm: [i16; SAMPLES_PER_FRAME] =
                std::array::from_fn(|i| ((i as i32 * 37) % 2000 - 1000) as i16);
            let frame = codec.encode(&pcm);
            assert_eq!(frame.len(), mode.frame_len());
            assert_eq!(unpack_frame_type(frame[0]), ft);
        }
    }

    #[test]
    fn decode_rejects_wrong_length_frame() {
        let mut codec = AmrNbCodec::new(AmrMode::Mr1220);
        let bogus = vec![pack_toc_byte(7), 0, 0];
        assert!(codec.decode(&bogus).is_none());
    }

    #[test]
    fn decode_produces_full_window_for_every_mode() {
        for ft in 0u8..8 {
            let mode = AmrMode::from_frame_type(ft).unwrap();
            let mut enc = AmrNbCodec::new(mode);
            let mut dec = AmrNbCodec::new(mode);
            let pcm: [i16; SAMPLES_PER_FRAME] =
                std::array::from_fn(|i| (2000.0 * (i as f64 * 0.05).sin()) as i16);
            let frame = enc.encode(&pcm);
            let decoded = dec.decode(&frame);
            assert!(decoded.is_some());
        }
    }

    #[test]
    fn reset_clears_predictor_history() {
        let mut codec = AmrNbCodec::new(AmrMode::Mr1220);
        let pcm = [500i16; SAMPLES_PER_FRAME];
        let _ = codec.encode(&pcm);
        assert_ne!(codec.encode_history, [0; LPC_ORDER]);
        codec.reset();
        assert_eq!(codec.encode_history, [0; LPC_ORDER]);
        assert_eq!(codec.decode_history, [0; LPC_ORDER]);
    }

    #[test]
    fn highest_mode_roughly_tracks_a_quiet_tone() {
        let mut enc = AmrNbCodec::new(AmrMode::Mr1220);
        let mut dec = AmrNbCodec::new(AmrMode::Mr1220);
        let pcm: [i16; SAMPLES_PER_FRAME] =
            std::array::from_fn(|i| (300.0 * (i as f64 * 0.1).sin()) as i16);
        let frame = enc.encode(&pcm);
        let decoded = dec.decode(&frame).unwrap();

        let err: i64 = pcm
            .iter()
            .zip(decoded.iter())
            .map(|(a, b)| ((*a as i64) - (*b as i64)).abs())
            .sum();
        let avg_err = err / SAMPLES_PER_FRAME as i64;
        assert!(avg_err < 2000, "average per-sample error too large: {avg_err}");
    }
}
