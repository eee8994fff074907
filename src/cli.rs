//! Command-line argument parsing (spec §6: "`nettalk [--socks5h addr:port]
//! <configPath>`").
//!
//! Grounded on `original_source/src/startup.c`'s `main`/`ip_port_decode`
//! (the `--socks5h host:port` flag and its manual address:port split), using
//! `clap`'s derive API rather than hand-rolled `argv` walking.

use clap::Parser;

use crate::error::{NettalkError, Result};
use crate::relay::RelayTarget;

#[derive(Parser, Debug)]
#[command(name = "nettalk", about = "Encrypted peer-to-peer voice-and-text chat")]
pub struct Cli {
    /// Route the relay connection through a SOCKS5 proxy at `addr:port`.
    #[arg(long = "socks5h", value_name = "addr:port")]
    pub socks5h: Option<String>,

    /// Path to the encrypted configuration file.
    pub config_path: std::path::PathBuf,
}

impl Cli {
    /// Parse the SOCKS5 proxy target, if one was given.
    pub fn socks5_target(&self) -> Result<Option<RelayTarget>> {
        let Some(raw) = &self.socks5h else { return Ok(None) };
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| NettalkError::ConfigInvalid)?;
        let port: u16 = port.parse().map_err(|_| NettalkError::ConfigInvalid)?;
        Ok(Some(RelayTarget { hostname: host.to_string(), port }))
    }
}

/// Read the configuration password from standard input, disabling terminal
/// echo when stdin is an interactive TTY (spec §6). `rpassword` falls back
/// to a plain `stdin` read when no TTY is attached (e.g. piped input in
/// scripted use or tests).
pub fn read_password() -> Result<String> {
    rpassword::prompt_password("config password: ").map_err(NettalkError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socks5_flag_and_config_path() {
        let cli = Cli::parse_from(["nettalk", "--socks5h", "127.0.0.1:9050", "config.bin"]);
        let target = cli.socks5_target().unwrap().unwrap();
        assert_eq!(target.hostname, "127.0.0.1");
        assert_eq!(target.port, 9050);
        assert_eq!(cli.config_path, std::path::PathBuf::from("config.bin"));
    }

    #[test]
    fn socks5_is_optional() {
        let cli = Cli::parse_from(["nettalk", "config.bin"]);
        assert!(cli.socks5_target().unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_socks5_target() {
        let cli = Cli::parse_from(["nettalk", "--socks5h", "not-a-host-port", "config.bin"]);
        assert!(cli.socks5_target().is_err());
    }
}
