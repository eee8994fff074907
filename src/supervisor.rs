//! Supervisor (spec §4.7): the serial reconnect loop tying every other
//! component together.
//!
//! Grounded on `original_source/src/nettask.c`: `nettask_entry_point`'s
//! infinite retry loop around `nettask_process` (connect → handshake →
//! spawn capture/playback → forward → teardown), and its "retry in 5 secs"
//! delay gated on whether the just-finished attempt stayed online for at
//! least 2 seconds.

use std::time::Instant;

use cpal::traits::HostTrait;
use crossbeam_channel::{Receiver, Sender};

use crate::audio::codec::AmrMode;
use crate::audio::{capture, playback};
use crate::bridge::CancelToken;
use crate::cipher::SessionCipher;
use crate::config::Configuration;
use crate::error::Result;
use crate::relay::{self, RelayTarget};
use crate::session::{Session, FAST_FAILURE_WINDOW};
use crate::{event_error, event_info};

const RETRY_DELAY_MS: u64 = 5000;

/// Run one connect → handshake → forward cycle to completion. Returns once
/// the peer disconnects, a watchdog fires, or `shutdown` is cancelled.
fn run_once(
    config: &Configuration,
    socks5_proxy: Option<&RelayTarget>,
    text_out: &Receiver<Vec<u8>>,
    text_in: &Sender<Vec<u8>>,
    session_cancel: &CancelToken,
    mode: AmrMode,
) -> Result<()> {
    let relay = RelayTarget { hostname: config.relay_hostname.clone(), port: config.relay_port };
    let mut network = relay::connect(&relay, socks5_proxy, &config.channel)?;

    let handshake = crate::handshake::run(&mut network, &config.self_private_key, &config.peer_public_key)?;
    let cipher = SessionCipher::new(&handshake.session_key, &handshake.tx_nonce, &handshake.rx_nonce);

    let mut session = Session::new(cipher, session_cancel.clone()).map_err(crate::error::NettalkError::Io)?;

    let bridge_local_capture = session.bridge.local.try_clone().map_err(crate::error::NettalkError::Io)?;
    let bridge_local_playback = session.bridge.local.try_clone().map_err(crate::error::NettalkError::Io)?;
    let mut bridge_remote = session.bridge.remote.try_clone().map_err(crate::error::NettalkError::Io)?;

    let host = cpal::default_host();
    let input_device = host.default_input_device();
    let output_device = host.default_output_device();

    let capture_cancel = session.cancel.clone();
    let capture_reset_flags = session.reset_flags.clone();
    let capture_text_out = text_out.clone();
    let capture_timestamps = session.timestamps.clone();
    let capture_handle = std::thread::spawn(move || match input_device {
        Some(device) => capture::run(
            device,
            bridge_local_capture,
            capture_text_out,
            capture_reset_flags,
            capture_cancel,
            mode,
            capture_timestamps,
        ),
        None => {
            event_error!("no capture device available, falling back to text-only");
            capture::run_text_only(bridge_local_capture, capture_text_out, capture_cancel, capture_timestamps)
        }
    });

    let playback_cancel = session.cancel.clone();
    let playback_reset_flags = session.reset_flags.clone();
    let playback_text_in = text_in.clone();
    let playback_timestamps = session.timestamps.clone();
    let playback_handle = std::thread::spawn(move || match output_device {
        Some(device) => playback::run(
            device,
            bridge_local_playback,
            playback_text_in,
            playback_reset_flags,
            playback_cancel,
            mode,
            playback_timestamps,
        ),
        None => {
            event_error!("no playback device available, falling back to text-only");
            playback::run_text_only(
                bridge_local_playback,
                playback_text_in,
                playback_reset_flags,
                playback_cancel,
                playback_timestamps,
            )
        }
    });

    event_info!("session online");
    let forward_result = crate::forward::run(&mut network, &mut bridge_remote, &mut session.cipher, &session.cancel);

    session.cancel.cancel();
    let _ = capture_handle.join();
    let _ = playback_handle.join();
    let _ = network.shutdown(std::net::Shutdown::Both);

    forward_result
}

/// Run the reconnect loop until `shutdown` is cancelled.
pub fn run(
    config: &Configuration,
    socks5_proxy: Option<RelayTarget>,
    text_out: Receiver<Vec<u8>>,
    text_in: Sender<Vec<u8>>,
    shutdown: CancelToken,
    mode: AmrMode,
) -> Result<()> {
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let attempt_start = Instant::now();
        let per_session_cancel = CancelToken::new();
        let relay_cancel = per_session_cancel.clone();
        let watcher = spawn_shutdown_watcher(shutdown.clone(), relay_cancel);

        let result = run_once(config, socks5_proxy.as_ref(), &text_out, &text_in, &per_session_cancel, mode);
        per_session_cancel.cancel();
        let _ = watcher.join();

        match result {
            Ok(()) => event_info!("session ended"),
            Err(e) => event_error!("lost connection with peer: {e}"),
        }

        if shutdown.is_cancelled() {
            return Ok(());
        }

        if attempt_start.elapsed() < FAST_FAILURE_WINDOW {
            event_info!("retrying in 5 secs...");
            wait_or_shutdown(&shutdown, RETRY_DELAY_MS);
        }
    }
}

/// Forward a top-level shutdown signal into a session-scoped cancel token,
/// so the reconnect loop can tell "the user quit" apart from "the session
/// ended on its own" (spec §9: cancellation must propagate promptly).
fn spawn_shutdown_watcher(shutdown: CancelToken, session_cancel: CancelToken) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        if session_cancel.is_cancelled() || shutdown.is_cancelled() {
            session_cancel.cancel();
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    })
}

fn wait_or_shutdown(shutdown: &CancelToken, millis: u64) {
    let deadline = Instant::now() + std::time::Duration::from_millis(millis);
    while Instant::now() < deadline {
        if shutdown.is_cancelled() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
}
