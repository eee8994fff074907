//! SOCKS5 client handshake (spec §6 boundary).
//!
//! Grounded on `original_source/src/socks5.c`: a minimal client that offers
//! only the "no authentication" method and issues a single hostname `CONNECT`
//! request. No BIND/UDP ASSOCIATE, no auth methods beyond `0x00` — this is
//! the boundary the spec names, not a general SOCKS5 implementation.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::{NettalkError, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(4);
const RECV_TIMEOUT: Duration = Duration::from_secs(4);
const MAX_HOSTNAME_LEN: usize = 255;

fn io_err(e: std::io::Error) -> NettalkError {
    NettalkError::ConnectFailed(e)
}

/// Greeting + method negotiation. Offers only `0x00` (no auth) and requires
/// the proxy to accept it.
pub fn handshake(stream: &mut TcpStream) -> Result<()> {
    stream.set_write_timeout(Some(SEND_TIMEOUT)).map_err(io_err)?;
    stream.set_read_timeout(Some(RECV_TIMEOUT)).map_err(io_err)?;

    stream.write_all(&[0x05, 0x01, 0x00]).map_err(io_err)?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).map_err(io_err)?;
    if reply[0] != 0x05 || reply[1] != 0x00 {
        return Err(NettalkError::ProxyRejected(reply[1]));
    }
    Ok(())
}

/// Issue a `CONNECT` request for `hostname:port` using address type `0x03`
/// (domain name), and require `rep == 0x00`.
pub fn request_connect(stream: &mut TcpStream, hostname: &str, port: u16) -> Result<()> {
    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(NettalkError::Internal("hostname too long for SOCKS5".into()));
    }

    let mut req = Vec::with_capacity(7 + hostname.len());
    req.push(0x05); // version
    req.push(0x01); // CONNECT
    req.push(0x00); // reserved
    req.push(0x03); // ATYP: domain name
    req.push(hostname.len() as u8);
    req.extend_from_slice(hostname.as_bytes());
    req.push((port >> 8) as u8);
    req.push((port & 0xff) as u8);

    stream.write_all(&req).map_err(io_err)?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).map_err(io_err)?;
    if reply[0] != 0x05 || reply[1] != 0x00 {
        return Err(NettalkError::ProxyRejected(reply[1]));
    }

    // Drain the rest of the reply (BND.ADDR/BND.PORT); length depends on
    // ATYP, which we don't otherwise need.
    let mut atyp = [0u8; 1];
    stream.read_exact(&mut atyp).map_err(io_err)?;
    let addr_len = match atyp[0] {
        0x01 => 4,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).map_err(io_err)?;
            len[0] as usize
        }
        0x04 => 16,
        other => return Err(NettalkError::Internal(format!("unknown SOCKS5 ATYP {other:#x}"))),
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).map_err(io_err)?;

    Ok(())
}
