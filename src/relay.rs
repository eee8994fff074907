//! Rendezvous relay client: connect (optionally via SOCKS5) and exchange
//! channel tags (spec §6).
//!
//! Grounded on `original_source/src/connect.c::nettalk_connect`: resolve,
//! connect (direct or through the proxy), send the local channel tag, then
//! wait (long timeout) for the relay to echo a peer's tag and require exact
//! equality.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{NettalkError, Result};
use crate::socks5;
use crate::{event_error, event_info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);
const SEND_TIMEOUT: Duration = Duration::from_secs(4);
const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum wire length of a channel tag (spec §3: "non-empty opaque byte
/// string", `original_source/include/config.h: CHANLEN 16`).
pub const CHANNEL_LEN: usize = 16;

pub struct RelayTarget {
    pub hostname: String,
    pub port: u16,
}

/// Connect to the relay, optionally routed through a SOCKS5 proxy, and
/// perform the channel-tag rendezvous. Returns the connected socket, ready
/// for the Handshake Engine.
pub fn connect(
    relay: &RelayTarget,
    socks5_proxy: Option<&RelayTarget>,
    channel: &[u8],
) -> Result<TcpStream> {
    if channel.is_empty() || channel.len() > CHANNEL_LEN {
        return Err(NettalkError::Internal("channel tag must be 1..=16 bytes".into()));
    }

    let mut stream = match socks5_proxy {
        Some(proxy) => {
            let addr = resolve(&proxy.hostname, proxy.port)?;
            let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
                .map_err(NettalkError::ConnectFailed)?;
            event_info!("connected with proxy");
            let mut stream = stream;
            socks5::handshake(&mut stream)?;
            event_info!("socks-5 handshake passed");
            socks5::request_connect(&mut stream, &relay.hostname, relay.port)?;
            event_info!("socks-5 request passed");
            stream
        }
        None => {
            let addr = resolve(&relay.hostname, relay.port)?;
            let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
                .map_err(NettalkError::ConnectFailed)?;
            event_info!("connected with server");
            stream
        }
    };

    stream.set_nodelay(true).map_err(NettalkError::ConnectFailed)?;
    send_channel_tag(&mut stream, channel)?;
    event_info!("broadcasted channel id");
    event_info!("waiting for remote peer...");

    match recv_channel_tag(&mut stream) {
        Ok(peer_tag) => {
            if !tag_matches(channel, &peer_tag) {
                event_error!("bound to wrong channel");
                return Err(NettalkError::WrongChannel);
            }
        }
        Err(NettalkError::Timeout) => {
            event_info!("reconnecting with server...");
            return Err(NettalkError::Timeout);
        }
        Err(e) => return Err(e),
    }

    event_info!("remote peer is online");
    Ok(stream)
}

fn resolve(hostname: &str, port: u16) -> Result<std::net::SocketAddr> {
    (hostname, port)
        .to_socket_addrs()
        .map_err(NettalkError::ResolveFailed)?
        .next()
        .ok_or_else(|| {
            NettalkError::ResolveFailed(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no address found",
            ))
        })
}

fn send_channel_tag(stream: &mut TcpStream, channel: &[u8]) -> Result<()> {
    stream
        .set_write_timeout(Some(SEND_TIMEOUT))
        .map_err(NettalkError::ConnectFailed)?;
    stream.write_all(channel).map_err(NettalkError::ConnectFailed)
}

fn recv_channel_tag(stream: &mut TcpStream) -> Result<[u8; CHANNEL_LEN]> {
    stream
        .set_read_timeout(Some(WAIT_TIMEOUT))
        .map_err(NettalkError::ConnectFailed)?;
    let mut buf = [0u8; CHANNEL_LEN];
    stream.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut {
            NettalkError::Timeout
        } else {
            NettalkError::ConnectFailed(e)
        }
    })?;
    Ok(buf)
}

/// A received tag matches if its non-padding prefix equals ours and the
/// remainder is zero-padding, mirroring the literal source's null-terminated
/// `strcmp` over a fixed `CHANLEN`-byte buffer.
fn tag_matches(ours: &[u8], received: &[u8; CHANNEL_LEN]) -> bool {
    received[..ours.len()] == *ours && received[ours.len()..].iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn tag_matching_allows_zero_padding() {
        let mut received = [0u8; CHANNEL_LEN];
        received[..4].copy_from_slice(b"demo");
        assert!(tag_matches(b"demo", &received));
        assert!(!tag_matches(b"demx", &received));
    }

    #[test]
    fn connect_succeeds_when_relay_echoes_same_tag() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut tag = [0u8; 4];
            sock.read_exact(&mut tag).unwrap();
            assert_eq!(&tag, b"demo");
            let mut reply = [0u8; CHANNEL_LEN];
            reply[..4].copy_from_slice(b"demo");
            sock.write_all(&reply).unwrap();
        });

        let target = RelayTarget { hostname: addr.ip().to_string(), port: addr.port() };
        let result = connect(&target, None, b"demo");
        assert!(result.is_ok());
        server.join().unwrap();
    }

    #[test]
    fn connect_fails_on_mismatched_tag() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut tag = [0u8; 1];
            sock.read_exact(&mut tag).unwrap();
            let mut reply = [0u8; CHANNEL_LEN];
            reply[0] = b'b';
            sock.write_all(&reply).unwrap();
        });

        let target = RelayTarget { hostname: addr.ip().to_string(), port: addr.port() };
        let err = connect(&target, None, b"a").unwrap_err();
        assert!(matches!(err, NettalkError::WrongChannel));
        server.join().unwrap();
    }
}
