use thiserror::Error;

use hasp_crypto::{KdfError, KeyError};

/// Login failure taxonomy. Captcha and two-factor challenges are not errors;
/// they surface as [`crate::AuthOutcome`] variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Network or server-side failure; the same attempt may be retried.
    #[error("transient: {0}")]
    Transient(String),
    /// Unexpected response shape or undecodable token; retrying the same
    /// input will not help.
    #[error("protocol_violation: {0}")]
    ProtocolViolation(String),
    /// The key connector could not be reached while it was required to
    /// custody or return master-key material. Fatal to this login.
    #[error("key_connector_unreachable")]
    KeyConnectorUnreachable,
    #[error("kdf_error: {0}")]
    Kdf(String),
    /// A two-factor answer was submitted with no challenge in flight.
    #[error("no_pending_challenge")]
    NoPendingChallenge,
    /// The session output could not be handed to the account store.
    #[error("account_store: {0}")]
    AccountStore(String),
}

impl From<KdfError> for AuthError {
    fn from(err: KdfError) -> Self {
        Self::Kdf(err.to_string())
    }
}

impl From<KeyError> for AuthError {
    fn from(err: KeyError) -> Self {
        Self::ProtocolViolation(format!("key material: {err}"))
    }
}
