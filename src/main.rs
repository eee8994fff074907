//! Binary entry point (spec §6 CLI, §4.7 Supervisor).
//!
//! Grounded on `original_source/src/startup.c::main`: parse arguments, load
//! and decrypt the configuration, then hand off to the networking task
//! loop. The GUI event loop (`window_init`) is out of scope here; this
//! binary drives the core headlessly, with text in/out over channels a
//! future terminal or GUI front-end can wire up.

mod audio;
mod bridge;
mod cipher;
mod cli;
mod config;
mod error;
mod event;
mod forward;
mod handshake;
mod random;
mod relay;
mod session;
mod socks5;
mod supervisor;
mod wire;

use clap::Parser;

use bridge::CancelToken;
use crate::{event_error, event_info};

fn run() -> error::Result<()> {
    let cli = cli::Cli::parse();
    let socks5_proxy = cli.socks5_target()?;

    random::init()?;
    event::init_default_subscriber();

    let password = cli::read_password()?;
    let config = config::load(&cli.config_path, &password).map_err(|e| {
        event_error!("failed to decrypt config");
        e
    })?;
    event_info!("config decrypted successfully");

    // This binary drives the core headlessly; a terminal or GUI front-end
    // would hold the other end of these channels to send/receive text.
    // Here they're just kept open so the capture/playback loops see an
    // always-empty outbound queue and a draining inbound one.
    let (_text_out_tx, text_out_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
    let (text_in_tx, _text_in_rx) = crossbeam_channel::unbounded::<Vec<u8>>();

    let shutdown = CancelToken::new();
    let shutdown_for_signal = shutdown.clone();
    let _ = ctrlc::set_handler(move || shutdown_for_signal.cancel());

    event_info!("Net Talk - ver. {}", env!("CARGO_PKG_VERSION"));
    event_info!("setup was successful");

    supervisor::run(&config, socks5_proxy, text_out_rx, text_in_tx, shutdown, config_default_mode())
}

/// AMR-NB-compatible mode used for newly captured audio. The spec leaves
/// bitrate selection to the caller; the core defaults to the original's
/// highest-fidelity mode (MR122).
fn config_default_mode() -> audio::codec::AmrMode {
    audio::codec::AmrMode::default()
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    std::process::exit(0);
}
