//! Handshake Engine (spec §4.4).
//!
//! Grounded line-for-line on `original_source/src/handshake.c::nettalk_handshake`:
//! RSA-encrypted partial-key exchange, XOR to derive the session key, then a
//! signed-nonce exchange to authenticate it. `xor_partial_keys` and
//! `hmac_sha256` there map directly to the helpers below.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use hmac::{Hmac, Mac};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::cipher::{KEY_LEN, NONCE_LEN};
use crate::error::{NettalkError, Result};
use crate::{event_error, event_info, event_success};

type HmacSha256 = Hmac<Sha256>;

const SEND_TIMEOUT: Duration = Duration::from_secs(4);
const RECV_TIMEOUT: Duration = Duration::from_secs(4);

/// The outcome of a completed handshake: a session key both sides agree on,
/// plus the per-direction nonces that seed the Session Cipher.
pub struct HandshakeResult {
    pub session_key: [u8; KEY_LEN],
    pub tx_nonce: [u8; NONCE_LEN],
    pub rx_nonce: [u8; NONCE_LEN],
}

impl Drop for HandshakeResult {
    fn drop(&mut self) {
        self.session_key.zeroize();
    }
}

fn io_timeout(e: std::io::Error) -> NettalkError {
    NettalkError::HandshakeFailed(format!("io: {e}"))
}

/// Run the handshake over an already-connected, already-channel-paired
/// socket. `self_priv` is our RSA private key; `peer_pub` is the peer's
/// public key from configuration.
pub fn run(
    stream: &mut TcpStream,
    self_priv: &RsaPrivateKey,
    peer_pub: &RsaPublicKey,
) -> Result<HandshakeResult> {
    stream.set_write_timeout(Some(SEND_TIMEOUT)).map_err(io_timeout)?;
    stream.set_read_timeout(Some(RECV_TIMEOUT)).map_err(io_timeout)?;

    let mut self_partial_key = crate::random::bytes::<32>()
        .map_err(|e| NettalkError::HandshakeFailed(format!("random: {e}")))?;
    event_info!("generated self session partial-key");

    let ciphertext = peer_pub
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &self_partial_key)
        .map_err(|e| {
            self_partial_key.zeroize();
            NettalkError::HandshakeFailed(format!("encrypt partial key: {e}"))
        })?;
    event_info!("encrypted self session partial-key");

    stream.write_all(&ciphertext).map_err(|e| {
        self_partial_key.zeroize();
        io_timeout(e)
    })?;
    event_info!("sent self session partial-key");

    let mut peer_ciphertext = vec![0u8; self_priv.size()];
    stream.read_exact(&mut peer_ciphertext).map_err(|e| {
        self_partial_key.zeroize();
        io_timeout(e)
    })?;
    event_info!("received peer session partial-key");

    let mut peer_partial_key = self_priv
        .decrypt(Pkcs1v15Encrypt, &peer_ciphertext)
        .map_err(|e| {
            self_partial_key.zeroize();
            NettalkError::HandshakeFailed(format!("decrypt partial key: {e}"))
        })?;
    event_info!("decrypted peer session partial-key");

    if peer_partial_key.len() != self_partial_key.len() {
        self_partial_key.zeroize();
        peer_partial_key.zeroize();
        return Err(NettalkError::HandshakeFailed("partial key length mismatch".into()));
    }

    let mut session_key = [0u8; KEY_LEN];
    for i in 0..KEY_LEN {
        session_key[i] = self_partial_key[i] ^ peer_partial_key[i];
    }
    self_partial_key.zeroize();
    peer_partial_key.zeroize();

    let mut tx_nonce = [0u8; NONCE_LEN];
    if let Err(e) = crate::random::fill(&mut tx_nonce) {
        session_key.zeroize();
        return Err(NettalkError::HandshakeFailed(format!("random: {e}")));
    }
    event_info!("generated auth tx nonce");

    let tx_hmac = sign_nonce(&session_key, &tx_nonce).map_err(|e| {
        session_key.zeroize();
        e
    })?;
    event_info!("signed auth tx nonce with hmac");

    let mut tx_frame = [0u8; NONCE_LEN + 32];
    tx_frame[..NONCE_LEN].copy_from_slice(&tx_nonce);
    tx_frame[NONCE_LEN..].copy_from_slice(&tx_hmac);

    stream.write_all(&tx_frame).map_err(|e| {
        session_key.zeroize();
        io_timeout(e)
    })?;
    event_info!("sent auth tx signed nonce");

    let mut rx_frame = [0u8; NONCE_LEN + 32];
    stream.read_exact(&mut rx_frame).map_err(|e| {
        session_key.zeroize();
        io_timeout(e)
    })?;
    event_info!("received auth rx signed nonce");

    let mut rx_nonce = [0u8; NONCE_LEN];
    rx_nonce.copy_from_slice(&rx_frame[..NONCE_LEN]);
    let rx_hmac = &rx_frame[NONCE_LEN..];

    let expected = sign_nonce(&session_key, &rx_nonce).map_err(|e| {
        session_key.zeroize();
        e
    })?;
    event_info!("recalculated rx nonce signature");

    if expected.as_slice() != rx_hmac {
        session_key.zeroize();
        event_error!("remote peer unauthorized");
        return Err(NettalkError::PeerUnauthorized);
    }

    event_success!("you are connected with peer");
    Ok(HandshakeResult { session_key, tx_nonce, rx_nonce })
}

fn sign_nonce(session_key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(session_key)
        .map_err(|e| NettalkError::HandshakeFailed(format!("hmac key: {e}")))?;
    mac.update(nonce);
    let out = mac.finalize().into_bytes();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let priv_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        (priv_key, pub_key)
    }

    #[test]
    fn both_peers_agree_on_session_key() {
        crate::random::init().unwrap();

        let (a_priv, a_pub) = keypair();
        let (b_priv, b_pub) = keypair();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            run(&mut sock, &b_priv, &a_pub).unwrap()
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let client_result = run(&mut client, &a_priv, &b_pub).unwrap();
        let server_result = server.join().unwrap();

        assert_eq!(client_result.session_key, server_result.session_key);
        assert_eq!(client_result.tx_nonce, server_result.rx_nonce);
        assert_eq!(client_result.rx_nonce, server_result.tx_nonce);
    }

    #[test]
    fn mismatched_session_keys_are_rejected() {
        crate::random::init().unwrap();

        let (a_priv, a_pub) = keypair();
        let (b_priv, _b_pub) = keypair();
        let (_wrong_priv, wrong_pub) = keypair();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || run(&mut listener.accept().unwrap().0, &b_priv, &a_pub));

        let mut client = TcpStream::connect(addr).unwrap();
        // Client encrypts its partial key under the wrong peer key, so the
        // server can't decrypt it into anything matching what it signs back.
        let client_result = run(&mut client, &a_priv, &wrong_pub);
        let server_result = server.join().unwrap();

        assert!(client_result.is_err() || server_result.is_err());
    }
}
