//! Playback (decode) direction of the Audio Pipeline (spec §4.6).
//!
//! Grounded on `original_source/src/playback.c` (the ALSA playback loop) and
//! `src/uncompress.c::nettalk_decode_audio` (the reset/init/noop/text/speech
//! chunk dispatch and the reset-needed resynchronization state machine).
//! Device I/O style generalized from `TING-HiuYu-Remote-Mic/src/audio.rs`.

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::audio::capture::ResetFlags;
use crate::audio::codec::{AmrMode, AmrNbCodec, SpeechCodec};
use crate::audio::params::CODEC_SAMPLE_RATE;
use crate::audio::resample::MonoResampler;
use crate::bridge::CancelToken;
use crate::error::{NettalkError, Result};
use crate::session::MessageTimestamps;
use crate::wire::{Chunk, ChunkParser};

fn duplicate_per_channel(mono: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return mono.to_vec();
    }
    let mut out = Vec::with_capacity(mono.len() * channels as usize);
    for &s in mono {
        for _ in 0..channels {
            out.push(s);
        }
    }
    out
}

fn build_output_stream(
    device: &Device,
    shared: Arc<Mutex<Vec<f32>>>,
) -> Result<(cpal::Stream, crate::audio::params::AudioParams)> {
    let cfg = device
        .default_output_config()
        .map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?;
    let sample_format = cfg.sample_format();
    let config: StreamConfig = cfg.into();
    let params = crate::audio::params::AudioParams {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
        sample_format,
    };

    let on_error = move |e: cpal::StreamError| {
        tracing::error!("playback stream error: {e}");
    };

    macro_rules! build_typed {
        ($sample_ty:ty, $conv:expr) => {{
            let shared = shared.clone();
            device.build_output_stream(
                &config,
                move |out: &mut [$sample_ty], _| {
                    let mut buf = shared.lock();
                    let n = out.len().min(buf.len());
                    let conv: fn(f32) -> $sample_ty = $conv;
                    for (dst, src) in out.iter_mut().zip(buf.drain(..n)) {
                        *dst = conv(src);
                    }
                    for dst in out.iter_mut().skip(n) {
                        *dst = conv(0.0);
                    }
                },
                on_error.clone(),
                None,
            )
        }};
    }

    let stream = match sample_format {
        SampleFormat::F32 => build_typed!(f32, |s| s)
            .map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?,
        SampleFormat::I16 => build_typed!(i16, |s: f32| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?,
        _ => build_typed!(u16, |s: f32| (((s.clamp(-1.0, 1.0) * 32767.0) as i32) + 32768) as u16)
            .map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?,
    };

    stream.play().map_err(|e| NettalkError::DeviceUnavailable(e.to_string()))?;
    Ok((stream, params))
}

/// Full playback loop with a real device.
pub fn run(
    device: Device,
    mut bridge_local: UnixStream,
    text_in: Sender<Vec<u8>>,
    reset_flags: Arc<ResetFlags>,
    cancel: CancelToken,
    mode: AmrMode,
    timestamps: Arc<Mutex<MessageTimestamps>>,
) -> Result<()> {
    let shared_out: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let (stream, params) = build_output_stream(&device, shared_out.clone())?;

    let mut resampler = MonoResampler::new(CODEC_SAMPLE_RATE, params.sample_rate)?;
    let mut codec = AmrNbCodec::new(mode);
    let mut parser = ChunkParser::new();
    let mut text_accumulator: Vec<u8> = Vec::new();

    let result = (|| -> Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            bridge_local
                .set_read_timeout(Some(Duration::from_millis(100)))
                .map_err(NettalkError::Io)?;
            let n = match bridge_local.read(&mut buf) {
                Ok(0) => return Err(NettalkError::PeerClosed),
                Ok(n) => n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => return Err(NettalkError::Io(e)),
            };
            parser.feed(&buf[..n]);

            for chunk in parser.drain() {
                match chunk {
                    Chunk::Reset => {
                        reset_flags.encoder_self.store(true, Ordering::SeqCst);
                    }
                    Chunk::Init => {
                        codec.reset();
                        parser.set_reset_needed(false);
                    }
                    Chunk::NoOp => {}
                    Chunk::Text(payload) => {
                        if let Some(bell) = payload.iter().position(|&b| b == crate::wire::TEXT_EOM) {
                            text_accumulator.extend_from_slice(&payload[..bell]);
                            let _ = text_in.send(std::mem::take(&mut text_accumulator));
                            timestamps.lock().record(SystemTime::now());
                        } else {
                            let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                            text_accumulator.extend_from_slice(&payload[..end]);
                        }
                    }
                    Chunk::Speech(frame) => match codec.decode(&frame) {
                        Some(pcm) => {
                            let as_f32: Vec<f32> =
                                pcm.iter().map(|&s| s as f32 / 32768.0).collect();
                            let resampled = resampler.process(&as_f32)?;
                            let device_samples = duplicate_per_channel(&resampled, params.channels);
                            shared_out.lock().extend(device_samples);
                        }
                        None => {
                            parser.set_reset_needed(true);
                            reset_flags.encoder_peer.store(true, Ordering::SeqCst);
                        }
                    },
                }
            }
        }
    })();

    drop(stream);
    result
}

/// Text-only fallback: keep draining text chunks and honoring Reset/Init,
/// never touching the device (§4.6 "device-unavailable fallback").
pub fn run_text_only(
    mut bridge_local: UnixStream,
    text_in: Sender<Vec<u8>>,
    reset_flags: Arc<ResetFlags>,
    cancel: CancelToken,
    timestamps: Arc<Mutex<MessageTimestamps>>,
) -> Result<()> {
    let mut parser = ChunkParser::new();
    let mut text_accumulator: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        bridge_local
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(NettalkError::Io)?;
        let n = match bridge_local.read(&mut buf) {
            Ok(0) => return Err(NettalkError::PeerClosed),
            Ok(n) => n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => return Err(NettalkError::Io(e)),
        };
        parser.feed(&buf[..n]);

        for chunk in parser.drain() {
            match chunk {
                Chunk::Reset => reset_flags.encoder_self.store(true, Ordering::SeqCst),
                Chunk::Init => parser.set_reset_needed(false),
                Chunk::NoOp => {}
                Chunk::Text(payload) => {
                    if let Some(bell) = payload.iter().position(|&b| b == crate::wire::TEXT_EOM) {
                        text_accumulator.extend_from_slice(&payload[..bell]);
                        let _ = text_in.send(std::mem::take(&mut text_accumulator));
                        timestamps.lock().record(SystemTime::now());
                    } else {
                        let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                        text_accumulator.extend_from_slice(&payload[..end]);
                    }
                }
                Chunk::Speech(_) => {} // no device: drop, never decoded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_per_channel_replicates_mono_to_stereo() {
        let mono = vec![0.1f32, 0.2];
        let stereo = duplicate_per_channel(&mono, 2);
        assert_eq!(stereo, vec![0.1, 0.1, 0.2, 0.2]);
    }
}
