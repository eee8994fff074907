//! Capture (encode) direction of the Audio Pipeline (spec §4.6).
//!
//! Grounded on `original_source/src/capture.c` (the ALSA capture loop feeding
//! `nettalk_encode_audio`) and `src/compress.c` (`nettalk_encode_audio`,
//! `handle_message_output`, the reset-chunk/init-chunk dance). Device I/O
//! style — build a `cpal` input stream, hand raw callback data off through a
//! `crossbeam-channel` to a worker thread — is generalized from
//! `TING-HiuYu-Remote-Mic/src/audio.rs::build_input_stream`.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::audio::codec::{AmrMode, AmrNbCodec, SpeechCodec, SAMPLES_PER_FRAME};
use crate::audio::params::CODEC_SAMPLE_RATE;
use crate::audio::resample::MonoResampler;
use crate::bridge::CancelToken;
use crate::error::{NettalkError, Result};
use crate::session::MessageTimestamps;
use crate::wire::{self, Chunk};

/// Shared codec-reset signalling between capture and playback — replaces the
/// literal source's `reset_encoder_self`/`reset_encoder_peer` volatile ints
/// with atomics (§9: no mutex needed, single-word reads/writes are advisory).
#[derive(Default)]
pub struct ResetFlags {
    pub encoder_self: AtomicBool,
    pub encoder_peer: AtomicBool,
}

fn sample_to_f32(raw: &[u8], format: SampleFormat) -> Vec<f32> {
    match format {
        SampleFormat::F32 => raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        SampleFormat::I16 => raw
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        SampleFormat::U16 => raw
            .chunks_exact(2)
            .map(|b| (u16::from_le_bytes([b[0], b[1]]) as f32 - 32768.0) / 32768.0)
            .collect(),
        _ => Vec::new(),
    }
}

fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Build and start a cpal input stream, handing raw captured bytes off to
/// `tx` for the worker loop to process off the audio thread.
fn build_input_stream(
    device: &Device,
    tx: crossbeam_channel::Sender<Vec<u8>>,
) -> Result<(cpal::Stream, crate::audio::params::AudioParams)> {
    let cfg = device
        .default_input_config()
        .map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?;
    let sample_format = cfg.sample_format();
    let config: StreamConfig = cfg.into();
    let params = crate::audio::params::AudioParams {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
        sample_format,
    };

    let err_tx = tx.clone();
    let on_error = move |e: cpal::StreamError| {
        let _ = &err_tx;
        tracing::error!("capture stream error: {e}");
    };

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &config,
                move |data: &[f32], _| {
                    let bytes: Vec<u8> = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                    let _ = tx.send(bytes);
                },
                on_error,
                None,
            )
            .map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &config,
                move |data: &[i16], _| {
                    let bytes: Vec<u8> = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                    let _ = tx.send(bytes);
                },
                on_error,
                None,
            )
            .map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?,
        _ => device
            .build_input_stream(
                &config,
                move |data: &[u16], _| {
                    let bytes: Vec<u8> = data.iter().flat_map(|s| s.to_le_bytes()).collect();
                    let _ = tx.send(bytes);
                },
                on_error,
                None,
            )
            .map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?,
    };

    stream.play().map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?;
    Ok((stream, params))
}

struct FrameAssembler {
    leftover: Vec<i16>,
}

impl FrameAssembler {
    fn new() -> Self {
        Self { leftover: Vec::new() }
    }

    /// Convert resampled f32 samples to 16-bit PCM, concatenate with any
    /// leftover tail, and return as many complete 160-sample windows as
    /// possible, retaining the remainder for next time (§4.6 capture step 4).
    fn push(&mut self, resampled: &[f32]) -> Vec<[i16; SAMPLES_PER_FRAME]> {
        self.leftover
            .extend(resampled.iter().map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16));

        let mut windows = Vec::new();
        while self.leftover.len() >= SAMPLES_PER_FRAME {
            let mut window = [0i16; SAMPLES_PER_FRAME];
            window.copy_from_slice(&self.leftover[..SAMPLES_PER_FRAME]);
            windows.push(window);
            self.leftover.drain(..SAMPLES_PER_FRAME);
        }
        windows
    }
}

/// Drain up to one pending outbound text message and frame it as `Text`
/// chunks, mirroring `handle_message_output`'s 8-byte-payload chunking.
fn drain_outbound_text(
    text_out: &Receiver<Vec<u8>>,
    bridge_local: &mut UnixStream,
    timestamps: &Arc<Mutex<MessageTimestamps>>,
) -> Result<()> {
    while let Ok(message) = text_out.try_recv() {
        for piece in message.chunks(8) {
            let mut payload = [0u8; 8];
            payload[..piece.len()].copy_from_slice(piece);
            bridge_local
                .write_all(&wire::encode(&Chunk::Text(payload)))
                .map_err(NettalkError::Io)?;
        }
        timestamps.lock().record(SystemTime::now());
    }
    Ok(())
}

/// Full capture loop with a real device: PCM in, AMR-NB-compatible chunks
/// and drained text out, over the bridge.
pub fn run(
    device: Device,
    mut bridge_local: UnixStream,
    text_out: Receiver<Vec<u8>>,
    reset_flags: Arc<ResetFlags>,
    cancel: CancelToken,
    mode: AmrMode,
    timestamps: Arc<Mutex<MessageTimestamps>>,
) -> Result<()> {
    let (raw_tx, raw_rx) = crossbeam_channel::unbounded();
    let (stream, params) = build_input_stream(&device, raw_tx)?;

    let mut resampler = MonoResampler::new(params.sample_rate, CODEC_SAMPLE_RATE)?;
    let mut assembler = FrameAssembler::new();
    let mut codec = AmrNbCodec::new(mode);

    let result = (|| -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if reset_flags.encoder_peer.swap(false, Ordering::SeqCst) {
                bridge_local
                    .write_all(&wire::encode(&Chunk::Reset))
                    .map_err(NettalkError::Io)?;
            }
            if reset_flags.encoder_self.swap(false, Ordering::SeqCst) {
                codec.reset();
                bridge_local
                    .write_all(&wire::encode(&Chunk::Init))
                    .map_err(NettalkError::Io)?;
            }

            drain_outbound_text(&text_out, &mut bridge_local, &timestamps)?;

            match raw_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(raw) => {
                    let f32_samples = sample_to_f32(&raw, params.sample_format);
                    let mono = downmix_to_mono(&f32_samples, params.channels);
                    let resampled = resampler.process(&mono)?;
                    for window in assembler.push(&resampled) {
                        let frame = codec.encode(&window);
                        bridge_local.write_all(&frame).map_err(NettalkError::Io)?;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(NettalkError::DeviceUnavailable("capture stream closed".into()))
                }
            }
        }
    })();

    drop(stream);
    result
}

/// Text-only fallback: no device, just drain outbound text and honor
/// cancellation, matching §4.6's "device-unavailable fallback".
pub fn run_text_only(
    mut bridge_local: UnixStream,
    text_out: Receiver<Vec<u8>>,
    cancel: CancelToken,
    timestamps: Arc<Mutex<MessageTimestamps>>,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        drain_outbound_text(&text_out, &mut bridge_local, &timestamps)?;
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_assembler_emits_complete_windows_and_retains_tail() {
        let mut assembler = FrameAssembler::new();
        let samples: Vec<f32> = vec![0.1; SAMPLES_PER_FRAME + 40];
        let windows = assembler.push(&samples);
        assert_eq!(windows.len(), 1);
        assert_eq!(assembler.leftover.len(), 40);
    }

    #[test]
    fn downmix_averages_channels() {
        let interleaved = vec![1.0f32, -1.0, 0.5, 0.5];
        let mono = downmix_to_mono(&interleaved, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }
}
