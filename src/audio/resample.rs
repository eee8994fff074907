//! SoX-quality resampler (spec §4.6 step 3 / playback step 3).
//!
//! Grounded on `original_source/src/compress.c`'s `soxr_create`/`soxr_process`
//! (SOXR_VHQ quality, float32 mono) and `uncompress.c`'s mirrored
//! upsample-on-playback path. No `soxr` binding exists in this corpus;
//! `rubato` is the standard pure-Rust equivalent for this quality tier.

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use crate::error::{NettalkError, Result};

const CHUNK_FRAMES: usize = 256;

fn quality_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Mono sample-rate converter with internal buffering so callers can feed it
/// arbitrarily sized chunks (device callback sizes vary by host/backend).
pub struct MonoResampler {
    inner: SincFixedIn<f32>,
    input_buf: Vec<f32>,
    output_buf: Vec<f32>,
}

impl MonoResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Result<Self> {
        let ratio = out_rate as f64 / in_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, quality_params(), CHUNK_FRAMES, 1)
            .map_err(|e| NettalkError::Internal(format!("resampler init: {e}")))?;
        Ok(Self { inner, input_buf: Vec::new(), output_buf: Vec::new() })
    }

    /// Feed `samples` in; drain however many resampled output samples are
    /// ready so far. Leftover input below one chunk is buffered internally.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.input_buf.extend_from_slice(samples);

        loop {
            let needed = self.inner.input_frames_next();
            if self.input_buf.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.input_buf.drain(..needed).collect();
            let waves_in = vec![chunk];
            let waves_out = self
                .inner
                .process(&waves_in, None)
                .map_err(|e| NettalkError::Internal(format!("resample: {e}")))?;
            self.output_buf.extend_from_slice(&waves_out[0]);
        }

        Ok(std::mem::take(&mut self.output_buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsamples_44100_to_8000_without_error() {
        let mut r = MonoResampler::new(44100, 8000).unwrap();
        let input: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut total_out = 0;
        for chunk in input.chunks(512) {
            let out = r.process(chunk).unwrap();
            total_out += out.len();
        }
        // Roughly 8000/44100 of the input length; generous bounds since the
        // sinc resampler has warm-up/group delay.
        assert!(total_out > 500, "expected meaningful output, got {total_out}");
    }
}
