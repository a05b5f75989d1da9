use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use hasp_crypto::{
    derive_master_key, generate_key_pair, random_key_material, unwrap_user_key, wrap_user_key,
    DerivedKeys, KdfParams, KeyPair, MasterKey, UserKey,
};

use crate::credentials::{CredentialKind, CredentialSet};
use crate::error::AuthError;
use crate::services::{KeysRequest, SetKeyConnectorKeyRequest};
use crate::session::{ClientOptions, Collaborators};
use crate::token::TokenSuccess;

/// Final session output, handed to the account store as soon as it exists.
#[derive(Clone)]
pub struct ProvisionedAccount {
    pub user_id: Uuid,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub kdf: KdfParams,
    /// Wrapped account encryption key, as returned or freshly created.
    pub encryption_key: Option<String>,
    /// Wrapped private half of the account keypair; `None` for legacy
    /// accounts whose keypair registration has not succeeded yet.
    pub encrypted_private_key: Option<String>,
    /// Password-derived hash kept for local re-verification. Never the
    /// master key itself.
    pub local_verification_hash: Option<String>,
    pub api_key_identity: Option<ApiKeyIdentity>,
    pub premium: bool,
}

impl std::fmt::Debug for ProvisionedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedAccount")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("premium", &self.premium)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeyIdentity {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ApiKeyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyIdentity")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// What the caller gets back on a successful login. The provisioned
/// account itself has already moved to the account store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub user_id: Uuid,
    pub email: String,
    pub force_password_reset: bool,
    pub reset_master_password: bool,
}

/// Post-success provisioning. The step order is load-bearing: identity
/// claims gate everything, the remembered-device token is persisted before
/// any key handling, key material is resolved before the account is
/// materialized, and once the key branch starts it runs to a terminal
/// state.
#[instrument(level = "debug", skip_all, fields(credential = %credential.kind()))]
pub async fn provision_account(
    env: &Collaborators,
    options: &ClientOptions,
    payload: TokenSuccess,
    credential: &CredentialSet,
    derived: Option<&DerivedKeys>,
) -> Result<AuthSuccess, AuthError> {
    let claims = env.token_decoder.decode(&payload.access_token)?;

    if let Some(token) = payload.two_factor_token.as_deref() {
        let email_key = credential.email().unwrap_or(claims.email.as_str());
        env.two_factor_tokens.set(email_key, token).await?;
        debug!("persisted remembered two-factor token");
    }

    let success = AuthSuccess {
        user_id: claims.sub,
        email: claims.email.clone(),
        force_password_reset: payload.force_password_reset.unwrap_or(false),
        reset_master_password: payload.reset_master_password.unwrap_or(false),
    };

    let kdf = payload.kdf_params();
    let api_key_identity = credential
        .api_key_identity()
        .map(|(client_id, client_secret)| ApiKeyIdentity {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        });

    if !options.handle_keys {
        let account = ProvisionedAccount {
            user_id: claims.sub,
            email: claims.email,
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            kdf,
            encryption_key: None,
            encrypted_private_key: None,
            local_verification_hash: None,
            api_key_identity,
            premium: claims.premium,
        };
        env.accounts.materialize(account).await?;
        return Ok(success);
    }

    let mut master_key: Option<MasterKey> = derived.map(|keys| keys.master_key.clone());
    let local_verification_hash = derived.map(|keys| keys.local_verification_hash.clone());

    let mut encryption_key: Option<String> = None;
    let mut encrypted_private_key: Option<String> = None;

    let new_sso_account = credential.kind() == CredentialKind::Sso && payload.key.is_none();
    if new_sso_account {
        // Brand-new SSO user: no encryption key exists anywhere yet. When a
        // key connector is designated it becomes the custodian of freshly
        // generated master-key material; losing it here would leave the
        // account permanently unusable, so the push is fatal.
        if let Some(connector_url) = payload.key_connector_url.as_deref() {
            let material = BASE64.encode(random_key_material(64));
            let bootstrap_key = derive_master_key(&material, &claims.email, &kdf)?;
            let user_key = UserKey::generate();
            let wrapped_user_key = wrap_user_key(&bootstrap_key, &user_key)?;
            let key_pair = generate_key_pair(&user_key)?;

            let connector_material = BASE64.encode(bootstrap_key.as_bytes());
            if let Err(err) = env
                .key_connector
                .push_key(&payload.access_token, connector_url, &connector_material)
                .await
            {
                error!(error = %err, "key connector push failed; aborting login");
                return Err(AuthError::KeyConnectorUnreachable);
            }

            let request = SetKeyConnectorKeyRequest {
                key: wrapped_user_key.clone(),
                kdf: kdf.kind,
                kdf_iterations: kdf.iterations,
                kdf_memory: kdf.memory_mib,
                kdf_parallelism: kdf.parallelism,
                org_identifier: credential.org_id().map(str::to_string),
                keys: KeysRequest {
                    public_key: key_pair.public_key.clone(),
                    encrypted_private_key: key_pair.wrapped_private_key.clone(),
                },
            };
            env.key_registration
                .set_key_connector_key(&payload.access_token, &request)
                .await?;

            encryption_key = Some(wrapped_user_key);
            encrypted_private_key = Some(key_pair.wrapped_private_key);
        }
    } else {
        let connector_url = payload.key_connector_url.clone().or_else(|| {
            if payload.api_use_key_connector.unwrap_or(false) {
                options.key_connector_url.clone()
            } else {
                None
            }
        });
        if let Some(url) = connector_url {
            let fetched = env
                .key_connector
                .fetch_key(&payload.access_token, &url)
                .await
                .map_err(|err| {
                    error!(error = %err, "key connector fetch failed; aborting login");
                    AuthError::KeyConnectorUnreachable
                })?;
            master_key = Some(master_key_from_material(&fetched)?);
        }

        encryption_key = payload.key.clone();

        if payload.private_key.is_none() {
            // Legacy account without a keypair. Generation or registration
            // failure degrades sharing but must not fail the login; a later
            // login retries.
            match account_key_pair(master_key.as_ref(), encryption_key.as_deref()) {
                Ok(pair) => {
                    let request = KeysRequest {
                        public_key: pair.public_key.clone(),
                        encrypted_private_key: pair.wrapped_private_key.clone(),
                    };
                    match env
                        .key_registration
                        .register_key_pair(&payload.access_token, &request)
                        .await
                    {
                        Ok(()) => encrypted_private_key = Some(pair.wrapped_private_key),
                        Err(err) => {
                            error!(error = %err, "key pair registration failed; continuing without a key pair");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "key pair generation skipped");
                }
            }
        } else {
            encrypted_private_key = payload.private_key.clone();
        }
    }

    let account = ProvisionedAccount {
        user_id: claims.sub,
        email: claims.email,
        access_token: payload.access_token,
        refresh_token: payload.refresh_token,
        kdf,
        encryption_key,
        encrypted_private_key,
        local_verification_hash,
        api_key_identity,
        premium: claims.premium,
    };
    env.accounts.materialize(account).await?;

    // master_key and the derived hashes drop here; key material zeroizes.
    Ok(success)
}

fn master_key_from_material(material_b64: &str) -> Result<MasterKey, AuthError> {
    let bytes = BASE64.decode(material_b64).map_err(|_| {
        AuthError::ProtocolViolation("key connector returned undecodable key material".into())
    })?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        AuthError::ProtocolViolation("key connector returned key material of the wrong size".into())
    })?;
    Ok(MasterKey::from_bytes(bytes))
}

fn account_key_pair(
    master_key: Option<&MasterKey>,
    wrapped_key: Option<&str>,
) -> Result<KeyPair, AuthError> {
    let master_key = master_key.ok_or_else(|| {
        AuthError::ProtocolViolation("no master key in session for key pair generation".into())
    })?;
    let wrapped = wrapped_key.ok_or_else(|| {
        AuthError::ProtocolViolation("account has no encryption key to wrap a key pair".into())
    })?;
    let user_key = unwrap_user_key(master_key, wrapped)?;
    Ok(generate_key_pair(&user_key)?)
}
