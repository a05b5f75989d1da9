use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::instrument;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
pub const DEFAULT_ARGON2_ITERATIONS: u32 = 3;
pub const DEFAULT_ARGON2_MEMORY_MIB: u32 = 64;
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 4;

const MASTER_KEY_LEN: usize = 32;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum KdfKind {
    Pbkdf2Sha256 = 0,
    Argon2id = 1,
}

impl From<KdfKind> for i32 {
    fn from(value: KdfKind) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for KdfKind {
    type Error = KdfError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pbkdf2Sha256),
            1 => Ok(Self::Argon2id),
            _ => Err(KdfError::UnknownKind(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub kind: KdfKind,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mib: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
}

impl KdfParams {
    #[must_use]
    pub const fn default_pbkdf2() -> Self {
        Self {
            kind: KdfKind::Pbkdf2Sha256,
            iterations: DEFAULT_PBKDF2_ITERATIONS,
            memory_mib: None,
            parallelism: None,
        }
    }

    #[must_use]
    pub const fn default_argon2() -> Self {
        Self {
            kind: KdfKind::Argon2id,
            iterations: DEFAULT_ARGON2_ITERATIONS,
            memory_mib: Some(DEFAULT_ARGON2_MEMORY_MIB),
            parallelism: Some(DEFAULT_ARGON2_PARALLELISM),
        }
    }

    pub fn validate(&self) -> Result<(), KdfError> {
        if self.iterations == 0 {
            return Err(KdfError::InvalidParams("iterations must be non-zero"));
        }
        if self.kind == KdfKind::Argon2id {
            self.argon2_cost()?;
        }
        Ok(())
    }

    fn argon2_cost(&self) -> Result<(u32, u32), KdfError> {
        let memory_mib = self
            .memory_mib
            .filter(|mib| *mib > 0)
            .ok_or(KdfError::InvalidParams("argon2 requires memory"))?;
        let parallelism = self
            .parallelism
            .filter(|lanes| *lanes > 0)
            .ok_or(KdfError::InvalidParams("argon2 requires parallelism"))?;
        Ok((memory_mib, parallelism))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::default_pbkdf2()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KdfError {
    InvalidParams(&'static str),
    UnknownKind(i32),
    DerivationFailed,
}

impl std::fmt::Display for KdfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParams(reason) => write!(f, "invalid kdf parameters: {reason}"),
            Self::UnknownKind(value) => write!(f, "unknown kdf kind: {value}"),
            Self::DerivationFailed => write!(f, "key derivation failed"),
        }
    }
}

impl std::error::Error for KdfError {}

/// Lookup and derivation always key on the normalized form; deriving with a
/// raw email is a defined bug class.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey(REDACTED)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashPurpose {
    ServerAuthorization,
    LocalAuthorization,
}

#[derive(Clone)]
pub struct DerivedKeys {
    pub master_key: MasterKey,
    pub server_auth_hash: String,
    pub local_verification_hash: String,
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedKeys(REDACTED)")
    }
}

#[instrument(level = "debug", skip(password, email), fields(kind = ?params.kind, iterations = params.iterations))]
pub fn derive_master_key(
    password: &str,
    email: &str,
    params: &KdfParams,
) -> Result<MasterKey, KdfError> {
    params.validate()?;
    let email = normalize_email(email);
    let mut out = [0u8; MASTER_KEY_LEN];
    match params.kind {
        KdfKind::Pbkdf2Sha256 => {
            pbkdf2_hmac::<Sha256>(
                password.as_bytes(),
                email.as_bytes(),
                params.iterations,
                &mut out,
            );
        }
        KdfKind::Argon2id => {
            let (memory_mib, parallelism) = params.argon2_cost()?;
            let argon_params = Params::new(
                memory_mib * 1024,
                params.iterations,
                parallelism,
                Some(MASTER_KEY_LEN),
            )
            .map_err(|_| KdfError::InvalidParams("argon2 cost out of range"))?;
            // Argon2 needs a salt of at least 8 bytes; the email alone may be
            // shorter, so it is hashed first.
            let salt = Sha256::digest(email.as_bytes());
            Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
                .hash_password_into(password.as_bytes(), &salt, &mut out)
                .map_err(|_| KdfError::DerivationFailed)?;
        }
    }
    Ok(MasterKey::from_bytes(out))
}

/// One PBKDF2 round for the hash sent to the server, two for the hash kept
/// for local re-verification, so the two purposes can never collide.
#[must_use]
pub fn derive_auth_hash(master_key: &MasterKey, password: &str, purpose: HashPurpose) -> String {
    let rounds = match purpose {
        HashPurpose::ServerAuthorization => 1,
        HashPurpose::LocalAuthorization => 2,
    };
    let mut out = [0u8; MASTER_KEY_LEN];
    pbkdf2_hmac::<Sha256>(master_key.as_bytes(), password.as_bytes(), rounds, &mut out);
    let encoded = BASE64.encode(out);
    out.zeroize();
    encoded
}

#[instrument(level = "debug", skip(password, email), fields(kind = ?params.kind))]
pub fn derive_keys(password: &str, email: &str, params: &KdfParams) -> Result<DerivedKeys, KdfError> {
    let master_key = derive_master_key(password, email, params)?;
    let server_auth_hash = derive_auth_hash(&master_key, password, HashPurpose::ServerAuthorization);
    let local_verification_hash =
        derive_auth_hash(&master_key, password, HashPurpose::LocalAuthorization);
    Ok(DerivedKeys {
        master_key,
        server_auth_hash,
        local_verification_hash,
    })
}

#[must_use]
pub fn verify_local_hash(expected: &str, candidate: &str) -> bool {
    expected.as_bytes().ct_eq(candidate.as_bytes()).into()
}
