//! Encrypted configuration container (spec §3 "Encrypted config container",
//! §4.8, §6 "persisted state").
//!
//! Grounded on `original_source/lib/fxcrypt.c` (PBKDF2-SHA256 key derivation,
//! AES-256-CBC with PKCS#7 padding, HMAC-SHA256 tag, salt/iv/ciphertext
//! layout) and `src/config.c` (the `host=`/`port=`/`chan=`/`self=`/`cert=`/
//! `peer=` properties format loaded from the decrypted plaintext). Key
//! material is carried as base64-encoded PKCS#1 DER rather than the
//! original's comma/dot-mangled PEM, since that mangling existed only to
//! dodge the original properties parser's `\r`/`\n` delimiters.

use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{NettalkError, Result};

const MAGIC: &[u8; 8] = b"NTLKCFG1";
const SALT_LEN: usize = 32;
const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;
const HMAC_LEN: usize = 32;
const DERIVE_ROUNDS: u32 = 50_000;
const MAX_CHANNEL_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Fully parsed, decrypted runtime configuration (spec §3 "Configuration").
pub struct Configuration {
    pub relay_hostname: String,
    pub relay_port: u16,
    pub channel: Vec<u8>,
    pub self_private_key: RsaPrivateKey,
    pub self_public_key: RsaPublicKey,
    pub peer_public_key: RsaPublicKey,
}

fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, DERIVE_ROUNDS, &mut key);
    key
}

/// Encrypt a plaintext properties blob into the on-disk container format:
/// magic(8) || salt(32) || iv(16) || ciphertext(PKCS#7-padded) || hmac(32).
pub fn encrypt(password: &str, plaintext: &[u8], random_bytes: impl Fn(&mut [u8])) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    random_bytes(&mut salt);
    random_bytes(&mut iv);

    let mut key = derive_key(password, &salt);
    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(plaintext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key).expect("hmac accepts any key length");
    key.zeroize();
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(MAGIC.len() + SALT_LEN + IV_LEN + ciphertext.len() + HMAC_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    out
}

/// Decrypt and authenticate a container, returning its plaintext properties
/// blob. Wrong password and corruption are deliberately indistinguishable
/// (§3 invariant).
fn decrypt_container(password: &str, container: &[u8]) -> Result<Vec<u8>> {
    if container.len() < MAGIC.len() + SALT_LEN + IV_LEN + HMAC_LEN {
        return Err(NettalkError::ConfigInvalid);
    }
    let (magic, rest) = container.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(NettalkError::ConfigInvalid);
    }
    let (salt, rest) = rest.split_at(SALT_LEN);
    let (iv, rest) = rest.split_at(IV_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - HMAC_LEN);

    let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| NettalkError::ConfigInvalid)?;
    let mut key = derive_key(password, &salt);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key).expect("hmac accepts any key length");
    mac.update(iv);
    mac.update(ciphertext);
    if mac.verify_slice(tag).is_err() {
        key.zeroize();
        return Err(NettalkError::ConfigInvalid);
    }

    let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| NettalkError::ConfigInvalid)?;
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<cbc::cipher::block_padding::Pkcs7>(ciphertext)
        .map_err(|_| NettalkError::ConfigInvalid)?;
    key.zeroize();
    Ok(plaintext)
}

fn props_get<'a>(props: &'a str, name: &str) -> Result<&'a str> {
    for line in props.lines() {
        if let Some(value) = line.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')) {
            return Ok(value);
        }
    }
    Err(NettalkError::ConfigInvalid)
}

fn decode_rsa_private(b64: &str) -> Result<RsaPrivateKey> {
    let der = BASE64.decode(b64).map_err(|_| NettalkError::ConfigInvalid)?;
    RsaPrivateKey::from_pkcs1_der(&der).map_err(|_| NettalkError::ConfigInvalid)
}

fn decode_rsa_public(b64: &str) -> Result<RsaPublicKey> {
    let der = BASE64.decode(b64).map_err(|_| NettalkError::ConfigInvalid)?;
    RsaPublicKey::from_pkcs1_der(&der).map_err(|_| NettalkError::ConfigInvalid)
}

fn encode_rsa_private(key: &RsaPrivateKey) -> Result<String> {
    let der = key
        .to_pkcs1_der()
        .map_err(|e| NettalkError::Internal(e.to_string()))?;
    Ok(BASE64.encode(der.as_bytes()))
}

fn encode_rsa_public(key: &RsaPublicKey) -> Result<String> {
    let der = key
        .to_pkcs1_der()
        .map_err(|e| NettalkError::Internal(e.to_string()))?;
    Ok(BASE64.encode(der.as_ref()))
}

/// Parse the decrypted properties blob into a `Configuration`
/// (`host=`, `port=`, `chan=`, `self=`, `cert=`, `peer=`).
fn parse_properties(props: &str) -> Result<Configuration> {
    let relay_hostname = props_get(props, "host")?.to_string();
    let relay_port: u16 = props_get(props, "port")?
        .parse()
        .map_err(|_| NettalkError::ConfigInvalid)?;
    let channel = props_get(props, "chan")?.as_bytes().to_vec();
    if channel.is_empty() || channel.len() > MAX_CHANNEL_LEN {
        return Err(NettalkError::ConfigInvalid);
    }

    let self_private_key = decode_rsa_private(props_get(props, "self")?)?;
    let self_public_key = decode_rsa_public(props_get(props, "cert")?)?;
    let peer_public_key = decode_rsa_public(props_get(props, "peer")?)?;

    Ok(Configuration {
        relay_hostname,
        relay_port,
        channel,
        self_private_key,
        self_public_key,
        peer_public_key,
    })
}

/// Build the properties plaintext that `encrypt` consumes, the inverse of
/// `parse_properties` (used by config-generation tooling and tests).
pub fn render_properties(config: &Configuration) -> Result<String> {
    Ok(format!(
        "host={}\nport={}\nchan={}\nself={}\ncert={}\npeer={}\n",
        config.relay_hostname,
        config.relay_port,
        String::from_utf8_lossy(&config.channel),
        encode_rsa_private(&config.self_private_key)?,
        encode_rsa_public(&config.self_public_key)?,
        encode_rsa_public(&config.peer_public_key)?,
    ))
}

/// Load a `Configuration` from an encrypted container file on disk.
pub fn load(path: &std::path::Path, password: &str) -> Result<Configuration> {
    let container = std::fs::read(path).map_err(NettalkError::Io)?;
    let plaintext = decrypt_container(password, &container)?;
    let props = String::from_utf8(plaintext).map_err(|_| NettalkError::ConfigInvalid)?;
    parse_properties(&props)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::rand_core::OsRng;

    fn fixed_random(seed: u8) -> impl Fn(&mut [u8]) {
        move |out: &mut [u8]| {
            for (i, b) in out.iter_mut().enumerate() {
                *b = seed.wrapping_add(i as u8);
            }
        }
    }

    fn sample_config() -> Configuration {
        let mut rng = OsRng;
        let priv_key = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        let peer_priv = RsaPrivateKey::new(&mut rng, 512).unwrap();
        Configuration {
            relay_hostname: "relay.example.org".to_string(),
            relay_port: 4433,
            channel: b"abc123".to_vec(),
            self_private_key: priv_key,
            self_public_key: pub_key,
            peer_public_key: RsaPublicKey::from(&peer_priv),
        }
    }

    #[test]
    fn round_trips_through_encrypt_and_load_with_correct_password() {
        let config = sample_config();
        let props = render_properties(&config).unwrap();
        let container = encrypt("hunter2", props.as_bytes(), fixed_random(7));

        let plaintext = decrypt_container("hunter2", &container).unwrap();
        let parsed = parse_properties(&String::from_utf8(plaintext).unwrap()).unwrap();
        assert_eq!(parsed.relay_hostname, "relay.example.org");
        assert_eq!(parsed.relay_port, 4433);
        assert_eq!(parsed.channel, b"abc123");
    }

    #[test]
    fn wrong_password_is_rejected() {
        let config = sample_config();
        let props = render_properties(&config).unwrap();
        let container = encrypt("hunter2", props.as_bytes(), fixed_random(7));

        let err = decrypt_container("wrong-password", &container).unwrap_err();
        assert!(matches!(err, NettalkError::ConfigInvalid));
    }

    #[test]
    fn corrupted_container_is_rejected() {
        let config = sample_config();
        let props = render_properties(&config).unwrap();
        let mut container = encrypt("hunter2", props.as_bytes(), fixed_random(7));
        let last = container.len() - 1;
        container[last] ^= 0xff;

        let err = decrypt_container("hunter2", &container).unwrap_err();
        assert!(matches!(err, NettalkError::ConfigInvalid));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut container = encrypt("hunter2", b"host=a\n", fixed_random(3));
        container[0] ^= 0xff;
        let err = decrypt_container("hunter2", &container).unwrap_err();
        assert!(matches!(err, NettalkError::ConfigInvalid));
    }
}
