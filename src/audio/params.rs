//! Negotiated PCM stream parameters, generalized from
//! `TING-HiuYu-Remote-Mic/src/audio.rs`'s `AudioParams` (which carried the
//! same three fields for its own cpal streams).

use cpal::SampleFormat;

#[derive(Debug, Clone, Copy)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// AMR-NB-compatible operating rate (spec §4.6: "AMR-NB rate is 8kHz").
pub const CODEC_SAMPLE_RATE: u32 = 8000;
