//! Forwarding Engine (spec §4.5).
//!
//! Grounded on `original_source/src/forward.c`: `nettalk_forward_cycle`'s
//! 1000 ms poll, the 6-second decrypt watchdog, and the 2-second
//! un-enciphered NoOp keepalive. The `poll()`-over-pollfd readiness wait is
//! replaced, per §9, by short non-blocking retries bounded to the same ~1 s
//! cadence plus an explicit cancellation-token check, rather than a raw
//! reset pipe in the fd set. Record buffering (`seal`/`open_incoming`) is
//! owned by the Session Cipher, not by this module — see `cipher.rs`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use crate::bridge::CancelToken;
use crate::cipher::SessionCipher;
use crate::error::{NettalkError, Result};
use crate::wire;

/// Mirrors `FORWARD_CHUNK_LEN` from the literal source: the maximum slice of
/// bytes read per pass.
const FORWARD_CHUNK_LEN: usize = 4096;
const POLL_TICK: Duration = Duration::from_secs(1);
const DECRYPT_TIMEOUT: Duration = Duration::from_secs(6);
const ENCRYPT_IDLE: Duration = Duration::from_secs(2);

/// Run the forwarding cycle until the peer closes, a watchdog fires, or the
/// cancellation token is signalled (a graceful `Ok(())` return).
pub fn run(
    network: &mut TcpStream,
    bridge_remote: &mut UnixStream,
    cipher: &mut SessionCipher,
    cancel: &CancelToken,
) -> Result<()> {
    network.set_nonblocking(true).map_err(NettalkError::Io)?;

    let mut last_decrypted = Instant::now();
    let mut last_encrypted = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let now = Instant::now();
        if now.duration_since(last_decrypted) >= DECRYPT_TIMEOUT {
            return Err(NettalkError::Timeout);
        }
        if now.duration_since(last_encrypted) >= ENCRYPT_IDLE {
            let noop = wire::encode(&wire::Chunk::NoOp);
            // Un-enciphered, matching the literal source (spec §9 open
            // question): written straight to the network socket, not the
            // bridge, since the bridge's two ends only ever carry plaintext
            // between this engine and the audio threads.
            if network.write(&noop).is_ok() {
                last_encrypted = Instant::now();
            }
        }

        if decrypt_pass(network, bridge_remote, &mut cipher.rx)? {
            last_decrypted = Instant::now();
        }

        if encrypt_pass(bridge_remote, network, &mut cipher.tx)? {
            last_encrypted = Instant::now();
        }

        std::thread::sleep(POLL_TICK);
    }
}

fn classify_io_error(e: std::io::Error) -> Result<bool> {
    match e.kind() {
        std::io::ErrorKind::WouldBlock => Ok(false),
        _ => Err(NettalkError::PeerClosed),
    }
}

/// One pass of network → bridge: read ciphertext records, open them,
/// flush recovered plaintext. Returns `true` if any byte was forwarded
/// (resets the watchdog).
fn decrypt_pass(
    network: &mut TcpStream,
    bridge_remote: &mut UnixStream,
    rx: &mut crate::cipher::DirectionState,
) -> Result<bool> {
    if rx.pending_len() == 0 {
        let mut buf = [0u8; FORWARD_CHUNK_LEN];
        let n = match network.read(&mut buf) {
            Ok(0) => return Err(NettalkError::PeerClosed),
            Ok(n) => n,
            Err(e) => return classify_io_error(e),
        };
        rx.open_incoming(&buf[..n])?;
    }

    flush_pending(bridge_remote, rx)
}

/// One pass of bridge → network: read plaintext, seal as a record, flush.
fn encrypt_pass(
    bridge_remote: &mut UnixStream,
    network: &mut TcpStream,
    tx: &mut crate::cipher::DirectionState,
) -> Result<bool> {
    if tx.pending_len() == 0 {
        let mut buf = [0u8; FORWARD_CHUNK_LEN];
        let n = match bridge_remote.read(&mut buf) {
            Ok(0) => return Err(NettalkError::PeerClosed),
            Ok(n) => n,
            Err(e) => return classify_io_error(e),
        };
        tx.seal(&buf[..n])?;
    }

    flush_pending_to_network(network, tx)
}

fn flush_pending(bridge_remote: &mut UnixStream, rx: &mut crate::cipher::DirectionState) -> Result<bool> {
    if rx.pending_len() == 0 {
        return Ok(false);
    }
    match bridge_remote.write(rx.peek()) {
        Ok(0) => Ok(false),
        Ok(n) => {
            rx.consume(n);
            Ok(true)
        }
        Err(e) => classify_io_error(e),
    }
}

fn flush_pending_to_network(network: &mut TcpStream, tx: &mut crate::cipher::DirectionState) -> Result<bool> {
    if tx.pending_len() == 0 {
        return Ok(false);
    }
    match network.write(tx.peek()) {
        Ok(0) => Ok(false),
        Ok(n) => {
            tx.consume(n);
            Ok(true)
        }
        Err(e) => classify_io_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use std::net::TcpListener;
    use std::thread;

    fn cipher_pair() -> (SessionCipher, SessionCipher) {
        let key = [7u8; crate::cipher::KEY_LEN];
        let n1 = [1u8; crate::cipher::NONCE_LEN];
        let n2 = [2u8; crate::cipher::NONCE_LEN];
        (SessionCipher::new(&key, &n1, &n2), SessionCipher::new(&key, &n2, &n1))
    }

    #[test]
    fn cancellation_stops_the_loop_within_a_tick() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || listener.accept().unwrap().0);
        let mut client = TcpStream::connect(addr).unwrap();
        let mut _server_sock = server.join().unwrap();

        let bridge = Bridge::new().unwrap();
        let mut remote = bridge.remote;
        let (mut cipher_a, _cipher_b) = cipher_pair();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = run(&mut client, &mut remote, &mut cipher_a, &cancel);
        assert!(result.is_ok());
    }

    #[test]
    fn peer_close_is_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            drop(sock);
        });
        let mut client = TcpStream::connect(addr).unwrap();
        server.join().unwrap();
        // give the FIN a moment to arrive
        thread::sleep(Duration::from_millis(50));

        let bridge = Bridge::new().unwrap();
        let mut remote = bridge.remote;
        let (mut cipher_a, _cipher_b) = cipher_pair();
        let cancel = CancelToken::new();

        let result = run(&mut client, &mut remote, &mut cipher_a, &cancel);
        assert!(matches!(result, Err(NettalkError::PeerClosed)));
    }

    #[test]
    fn idle_keepalive_reaches_the_network_socket_not_the_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || listener.accept().unwrap().0);
        let mut client = TcpStream::connect(addr).unwrap();
        let mut server_sock = server.join().unwrap();
        server_sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let bridge = Bridge::new().unwrap();
        let mut remote = bridge.remote;
        let (mut cipher_a, _cipher_b) = cipher_pair();
        let cancel = CancelToken::new();
        let run_cancel = cancel.clone();

        let runner = thread::spawn(move || run(&mut client, &mut remote, &mut cipher_a, &run_cancel));

        let mut buf = [0u8; 32];
        server_sock.read_exact(&mut buf).unwrap();
        assert_eq!(buf, wire::encode(&wire::Chunk::NoOp).as_slice());

        cancel.cancel();
        let _ = runner.join();
    }
}
