use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tracing::instrument;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdf::MasterKey;

const USER_KEY_LEN: usize = 64;
const WRAP_KEY_LEN: usize = 32;
const XCHACHA_NONCE_LEN: usize = 24;
const ENVELOPE_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    InvalidEnvelope,
    UnsupportedVersion(String),
    EncryptionFailed,
    DecryptionFailed,
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEnvelope => write!(f, "invalid key envelope"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported envelope version: {version}")
            }
            Self::EncryptionFailed => write!(f, "key wrapping failed"),
            Self::DecryptionFailed => write!(f, "key unwrapping failed"),
        }
    }
}

impl std::error::Error for KeyError {}

/// Account encryption key. 64 bytes; the first half keys the symmetric
/// cipher, the second half is reserved for authentication schemes that
/// split encrypt/MAC material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UserKey([u8; USER_KEY_LEN]);

impl UserKey {
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; USER_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; USER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; USER_KEY_LEN] {
        &self.0
    }

    fn encryption_half(&self) -> [u8; WRAP_KEY_LEN] {
        let mut half = [0u8; WRAP_KEY_LEN];
        half.copy_from_slice(&self.0[..WRAP_KEY_LEN]);
        half
    }
}

impl std::fmt::Debug for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserKey(REDACTED)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: String,
    pub wrapped_private_key: String,
}

/// HKDF-SHA256 expansion of the master key into the wrapping key. The raw
/// master key never touches the cipher directly.
fn stretch_master_key(master_key: &MasterKey) -> [u8; WRAP_KEY_LEN] {
    let hk = Hkdf::<Sha256>::from_prk(master_key.as_bytes()).expect("prk length is fixed");
    let mut okm = [0u8; WRAP_KEY_LEN];
    hk.expand(b"enc", &mut okm).expect("okm length is fixed");
    okm
}

fn seal(key: &[u8; WRAP_KEY_LEN], plaintext: &[u8]) -> Result<String, KeyError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| KeyError::EncryptionFailed)?;
    Ok(format!(
        "{ENVELOPE_VERSION}.{}.{}",
        BASE64.encode(nonce),
        BASE64.encode(ciphertext)
    ))
}

fn open(key: &[u8; WRAP_KEY_LEN], envelope: &str) -> Result<Vec<u8>, KeyError> {
    let mut parts = envelope.splitn(3, '.');
    let version = parts.next().ok_or(KeyError::InvalidEnvelope)?;
    if version != ENVELOPE_VERSION {
        return Err(KeyError::UnsupportedVersion(version.to_string()));
    }
    let nonce_b64 = parts.next().ok_or(KeyError::InvalidEnvelope)?;
    let ct_b64 = parts.next().ok_or(KeyError::InvalidEnvelope)?;
    let nonce_bytes = BASE64
        .decode(nonce_b64)
        .map_err(|_| KeyError::InvalidEnvelope)?;
    if nonce_bytes.len() != XCHACHA_NONCE_LEN {
        return Err(KeyError::InvalidEnvelope);
    }
    let ciphertext = BASE64.decode(ct_b64).map_err(|_| KeyError::InvalidEnvelope)?;
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| KeyError::DecryptionFailed)
}

#[instrument(level = "debug", skip(master_key, user_key))]
pub fn wrap_user_key(master_key: &MasterKey, user_key: &UserKey) -> Result<String, KeyError> {
    let mut wrap_key = stretch_master_key(master_key);
    let envelope = seal(&wrap_key, user_key.as_bytes());
    wrap_key.zeroize();
    envelope
}

#[instrument(level = "debug", skip(master_key, envelope))]
pub fn unwrap_user_key(master_key: &MasterKey, envelope: &str) -> Result<UserKey, KeyError> {
    let mut wrap_key = stretch_master_key(master_key);
    let result = open(&wrap_key, envelope);
    wrap_key.zeroize();
    let mut plaintext = result?;
    if plaintext.len() != USER_KEY_LEN {
        plaintext.zeroize();
        return Err(KeyError::InvalidEnvelope);
    }
    let mut bytes = [0u8; USER_KEY_LEN];
    bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();
    Ok(UserKey::from_bytes(bytes))
}

/// X25519 account keypair. The private half is wrapped under the user key so
/// only the public half and the sealed envelope ever leave this process.
#[instrument(level = "debug", skip(user_key))]
pub fn generate_key_pair(user_key: &UserKey) -> Result<KeyPair, KeyError> {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let mut wrap_key = user_key.encryption_half();
    let wrapped = seal(&wrap_key, secret.as_bytes());
    wrap_key.zeroize();
    Ok(KeyPair {
        public_key: BASE64.encode(public.as_bytes()),
        wrapped_private_key: wrapped?,
    })
}

pub fn unwrap_private_key(user_key: &UserKey, envelope: &str) -> Result<StaticSecret, KeyError> {
    let mut wrap_key = user_key.encryption_half();
    let result = open(&wrap_key, envelope);
    wrap_key.zeroize();
    let mut plaintext = result?;
    if plaintext.len() != 32 {
        plaintext.zeroize();
        return Err(KeyError::InvalidEnvelope);
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();
    Ok(StaticSecret::from(bytes))
}

#[must_use]
pub fn random_key_material(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::{derive_master_key, KdfKind, KdfParams};

    fn master_key() -> MasterKey {
        let params = KdfParams {
            kind: KdfKind::Pbkdf2Sha256,
            iterations: 10,
            memory_mib: None,
            parallelism: None,
        };
        derive_master_key("hunter2", "user@example.com", &params).expect("derive")
    }

    #[test]
    fn user_key_wrap_roundtrip() {
        let mk = master_key();
        let user_key = UserKey::generate();
        let envelope = wrap_user_key(&mk, &user_key).expect("wrap");
        let unwrapped = unwrap_user_key(&mk, &envelope).expect("unwrap");
        assert_eq!(unwrapped.as_bytes(), user_key.as_bytes());
    }

    #[test]
    fn unwrap_with_wrong_master_key_fails() {
        let mk = master_key();
        let other = MasterKey::from_bytes([7u8; 32]);
        let envelope = wrap_user_key(&mk, &UserKey::generate()).expect("wrap");
        assert!(matches!(
            unwrap_user_key(&other, &envelope),
            Err(KeyError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_envelope_fails() {
        let mk = master_key();
        let envelope = wrap_user_key(&mk, &UserKey::generate()).expect("wrap");
        let mut tampered = envelope.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] ^= b'!';
        let tampered = String::from_utf8(tampered).expect("utf8");
        assert!(unwrap_user_key(&mk, &tampered).is_err());
    }

    #[test]
    fn unknown_envelope_version_rejected() {
        let mk = master_key();
        assert!(matches!(
            unwrap_user_key(&mk, "v9.AAAA.BBBB"),
            Err(KeyError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn key_pair_private_half_matches_public() {
        let user_key = UserKey::generate();
        let pair = generate_key_pair(&user_key).expect("keypair");
        let secret = unwrap_private_key(&user_key, &pair.wrapped_private_key).expect("unwrap");
        let public = PublicKey::from(&secret);
        assert_eq!(pair.public_key, BASE64.encode(public.as_bytes()));
    }

    #[test]
    fn random_key_material_has_requested_length() {
        assert_eq!(random_key_material(64).len(), 64);
        assert_ne!(random_key_material(64), random_key_material(64));
    }
}
