use std::sync::Arc;

use tracing::{debug, instrument};

use hasp_crypto::{derive_keys, normalize_email, DerivedKeys, KdfParams};

use crate::credentials::{CredentialKind, CredentialSet};
use crate::error::AuthError;
use crate::provision::{provision_account, AuthSuccess};
use crate::services::{
    AccountStore, DeviceIdentity, IdentityEndpoint, KeyConnectorClient, KeyRegistrationApi,
    PreloginLookup, TokenDecoder, TwoFactorTokenStore,
};
use crate::token::{classify_identity_response, IdentityResponse, TokenRequest, TwoFactorSubmission};
use crate::two_factor::{
    list_supported_providers, select_default_provider, CapabilityFlags, TwoFactorOffer,
    TwoFactorProvider,
};

/// Everything the engine calls out to. Transport, storage and decoding live
/// behind these seams; the engine owns only the protocol.
#[derive(Clone)]
pub struct Collaborators {
    pub prelogin: Arc<dyn PreloginLookup>,
    pub identity: Arc<dyn IdentityEndpoint>,
    pub device: Arc<dyn DeviceIdentity>,
    pub token_decoder: Arc<dyn TokenDecoder>,
    pub two_factor_tokens: Arc<dyn TwoFactorTokenStore>,
    pub key_connector: Arc<dyn KeyConnectorClient>,
    pub key_registration: Arc<dyn KeyRegistrationApi>,
    pub accounts: Arc<dyn AccountStore>,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// When false the session skips all key-material handling and produces
    /// accounts without encryption keys.
    pub handle_keys: bool,
    /// Fallback key-connector URL for responses that set the use-flag
    /// without carrying an explicit URL.
    pub key_connector_url: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            handle_keys: true,
            key_connector_url: None,
        }
    }
}

/// Terminal and non-terminal login outcomes. Failures travel separately as
/// [`AuthError`].
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Success(AuthSuccess),
    TwoFactorRequired {
        offer: TwoFactorOffer,
        captcha_token: Option<String>,
    },
    CaptchaRequired {
        site_key: String,
    },
}

/// In-flight state between a two-factor challenge and its answer. Holds the
/// credential snapshot and derived keys so the follow-up submission reuses
/// them verbatim; destroyed on success, failure or cancel.
pub struct PendingChallenge {
    pub(crate) credential: CredentialSet,
    pub(crate) derived: Option<DerivedKeys>,
    offer: TwoFactorOffer,
    captcha_token: Option<String>,
    selected: Option<TwoFactorProvider>,
}

impl PendingChallenge {
    #[must_use]
    pub fn offer(&self) -> &TwoFactorOffer {
        &self.offer
    }

    #[must_use]
    pub fn captcha_token(&self) -> Option<&str> {
        self.captcha_token.as_deref()
    }

    #[must_use]
    pub fn credential_kind(&self) -> CredentialKind {
        self.credential.kind()
    }

    #[must_use]
    pub fn selected_provider(&self) -> Option<TwoFactorProvider> {
        self.selected
    }
}

impl std::fmt::Debug for PendingChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingChallenge")
            .field("credential", &self.credential.kind())
            .field("offer", &self.offer)
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

/// The login orchestrator. One logical session per credential attempt; a
/// fresh top-level login while a challenge is pending discards the pending
/// state and its secrets before anything else happens.
pub struct LoginSession {
    env: Collaborators,
    options: ClientOptions,
    pending: Option<PendingChallenge>,
}

impl LoginSession {
    #[must_use]
    pub fn new(env: Collaborators) -> Self {
        Self::with_options(env, ClientOptions::default())
    }

    #[must_use]
    pub fn with_options(env: Collaborators, options: ClientOptions) -> Self {
        Self {
            env,
            options,
            pending: None,
        }
    }

    /// Prelogin KDF lookup with the documented not-found fallback.
    pub async fn lookup_kdf_params(&self, email: &str) -> Result<KdfParams, AuthError> {
        let email = normalize_email(email);
        match self.env.prelogin.lookup(&email).await? {
            Some(params) => Ok(params),
            None => {
                debug!("no prelogin record; using default kdf parameters");
                Ok(KdfParams::default_pbkdf2())
            }
        }
    }

    /// Derives the master key and both purpose hashes for `email` without
    /// starting a login, e.g. for local re-verification flows.
    pub async fn make_prelogin_keys(
        &self,
        email: &str,
        password: &str,
    ) -> Result<DerivedKeys, AuthError> {
        let email = normalize_email(email);
        let params = self.lookup_kdf_params(&email).await?;
        Ok(derive_keys(password, &email, &params)?)
    }

    #[instrument(level = "debug", skip_all, fields(credential = "password"))]
    pub async fn login_password(
        &mut self,
        email: &str,
        password: &str,
        captcha_token: Option<&str>,
    ) -> Result<AuthOutcome, AuthError> {
        self.pending = None;
        let email = normalize_email(email);
        let params = self.lookup_kdf_params(&email).await?;
        let derived = derive_keys(password, &email, &params)?;
        let credential = CredentialSet::Password {
            email: email.clone(),
            server_auth_hash: derived.server_auth_hash.clone(),
            local_hash: derived.local_verification_hash.clone(),
        };
        self.submit(
            credential,
            Some(derived),
            None,
            captcha_token.map(str::to_string),
            None,
        )
        .await
    }

    #[instrument(level = "debug", skip_all, fields(credential = "sso"))]
    pub async fn login_sso(
        &mut self,
        code: &str,
        code_verifier: &str,
        redirect_url: &str,
        org_id: Option<&str>,
    ) -> Result<AuthOutcome, AuthError> {
        self.pending = None;
        let credential = CredentialSet::Sso {
            code: code.to_string(),
            code_verifier: code_verifier.to_string(),
            redirect_url: redirect_url.to_string(),
            org_id: org_id.map(str::to_string),
        };
        self.submit(credential, None, None, None, None).await
    }

    #[instrument(level = "debug", skip_all, fields(credential = "api_key"))]
    pub async fn login_api_key(
        &mut self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<AuthOutcome, AuthError> {
        self.pending = None;
        let credential = CredentialSet::ApiKey {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        };
        self.submit(credential, None, None, None, None).await
    }

    /// Answers a pending two-factor challenge. The credential snapshot and
    /// derived keys from the challenge are reused verbatim.
    #[instrument(level = "debug", skip_all)]
    pub async fn login_two_factor(
        &mut self,
        provider: TwoFactorProvider,
        token: &str,
        remember: bool,
    ) -> Result<AuthOutcome, AuthError> {
        let pending = self.pending.take().ok_or(AuthError::NoPendingChallenge)?;
        let submission = TwoFactorSubmission {
            provider,
            token: token.to_string(),
            remember,
        };
        self.submit(
            pending.credential,
            pending.derived,
            Some(submission),
            pending.captcha_token,
            pending.selected,
        )
        .await
    }

    #[must_use]
    pub fn pending_challenge(&self) -> Option<&PendingChallenge> {
        self.pending.as_ref()
    }

    /// Discards the pending challenge and every secret it snapshotted.
    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    pub fn set_selected_provider(
        &mut self,
        provider: TwoFactorProvider,
    ) -> Result<(), AuthError> {
        let pending = self.pending.as_mut().ok_or(AuthError::NoPendingChallenge)?;
        pending.selected = Some(provider);
        Ok(())
    }

    #[must_use]
    pub fn select_default_provider(&self, caps: &CapabilityFlags) -> Option<TwoFactorProvider> {
        self.pending
            .as_ref()
            .and_then(|pending| select_default_provider(&pending.offer, pending.selected, caps))
    }

    #[must_use]
    pub fn supported_providers(&self, caps: &CapabilityFlags) -> Vec<TwoFactorProvider> {
        self.pending
            .as_ref()
            .map(|pending| list_supported_providers(&pending.offer, caps))
            .unwrap_or_default()
    }

    async fn submit(
        &mut self,
        credential: CredentialSet,
        derived: Option<DerivedKeys>,
        two_factor: Option<TwoFactorSubmission>,
        captcha_token: Option<String>,
        sticky: Option<TwoFactorProvider>,
    ) -> Result<AuthOutcome, AuthError> {
        let device = self.env.device.device();

        let remembered = match (&two_factor, credential.email()) {
            (None, Some(email)) => self.env.two_factor_tokens.get(email).await?,
            _ => None,
        };

        let request = TokenRequest::build(
            &credential,
            &device,
            two_factor.as_ref(),
            remembered.as_deref(),
            captcha_token.as_deref(),
        );
        let body = self.env.identity.exchange(&request).await?;

        match classify_identity_response(body)? {
            IdentityResponse::Captcha { site_key } => {
                debug!("identity endpoint requires captcha");
                Ok(AuthOutcome::CaptchaRequired { site_key })
            }
            IdentityResponse::TwoFactor {
                offer,
                captcha_token,
            } => {
                debug!(providers = offer.len(), "two-factor challenge received");
                self.pending = Some(PendingChallenge {
                    credential,
                    derived,
                    offer: offer.clone(),
                    captcha_token: captcha_token.clone(),
                    selected: sticky,
                });
                Ok(AuthOutcome::TwoFactorRequired {
                    offer,
                    captcha_token,
                })
            }
            IdentityResponse::Success(payload) => {
                let success = provision_account(
                    &self.env,
                    &self.options,
                    *payload,
                    &credential,
                    derived.as_ref(),
                )
                .await?;
                // credential and derived keys drop here; nothing in-flight
                // survives a terminal outcome.
                Ok(AuthOutcome::Success(success))
            }
        }
    }
}
