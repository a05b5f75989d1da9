use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use hasp_crypto::{KdfKind, KdfParams};

use crate::credentials::CredentialSet;
use crate::error::AuthError;
use crate::services::DeviceInfo;
use crate::two_factor::{TwoFactorOffer, TwoFactorProvider};

/// Explicit two-factor answer supplied by the caller.
#[derive(Debug, Clone)]
pub struct TwoFactorSubmission {
    pub provider: TwoFactorProvider,
    pub token: String,
    pub remember: bool,
}

/// Wire-level login request. Optional fields are omitted, not nulled; the
/// serialized request carries exactly one credential's fields and at most
/// one two-factor block.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub device_identifier: String,
    pub device_type: i32,
    pub device_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_password_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_factor_provider: Option<TwoFactorProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_factor_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_factor_remember: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub captcha_response: Option<String>,
}

impl TokenRequest {
    /// Two-factor precedence: an explicit answer wins, else a remembered
    /// device token rides the synthetic `Remember` provider, else the
    /// request carries no two-factor fields and the server challenges.
    #[must_use]
    pub fn build(
        credential: &CredentialSet,
        device: &DeviceInfo,
        two_factor: Option<&TwoFactorSubmission>,
        remembered_token: Option<&str>,
        captcha_token: Option<&str>,
    ) -> Self {
        let mut request = Self {
            device_identifier: device.app_id.clone(),
            device_type: device.device_type,
            device_name: device.name.clone(),
            email: None,
            master_password_hash: None,
            code: None,
            code_verifier: None,
            redirect_uri: None,
            client_id: None,
            client_secret: None,
            two_factor_provider: None,
            two_factor_token: None,
            two_factor_remember: None,
            captcha_response: captcha_token.map(str::to_string),
        };

        match credential {
            CredentialSet::Password {
                email,
                server_auth_hash,
                ..
            } => {
                request.email = Some(email.clone());
                request.master_password_hash = Some(server_auth_hash.clone());
            }
            CredentialSet::Sso {
                code,
                code_verifier,
                redirect_url,
                ..
            } => {
                request.code = Some(code.clone());
                request.code_verifier = Some(code_verifier.clone());
                request.redirect_uri = Some(redirect_url.clone());
            }
            CredentialSet::ApiKey {
                client_id,
                client_secret,
            } => {
                request.client_id = Some(client_id.clone());
                request.client_secret = Some(client_secret.clone());
            }
        }

        if let Some(submission) = two_factor {
            request.two_factor_provider = Some(submission.provider);
            request.two_factor_token = Some(submission.token.clone());
            request.two_factor_remember = Some(submission.remember);
        } else if let Some(token) = remembered_token {
            request.two_factor_provider = Some(TwoFactorProvider::Remember);
            request.two_factor_token = Some(token.to_string());
            request.two_factor_remember = Some(false);
        }

        request
    }
}

/// Success payload of the identity endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSuccess {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Wrapped account encryption key; absent for brand-new SSO users.
    #[serde(default)]
    pub key: Option<String>,
    /// Wrapped private key; absent for accounts predating keypairs.
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub key_connector_url: Option<String>,
    #[serde(default)]
    pub api_use_key_connector: Option<bool>,
    #[serde(default)]
    pub kdf: Option<KdfKind>,
    #[serde(default)]
    pub kdf_iterations: Option<u32>,
    #[serde(default)]
    pub kdf_memory: Option<u32>,
    #[serde(default)]
    pub kdf_parallelism: Option<u32>,
    /// Newly issued remembered-device token, if the user asked to remember.
    #[serde(default)]
    pub two_factor_token: Option<String>,
    #[serde(default)]
    pub force_password_reset: Option<bool>,
    #[serde(default)]
    pub reset_master_password: Option<bool>,
}

impl TokenSuccess {
    /// KDF negotiation with the legacy fallback: responses predating KDF
    /// fields imply the default PBKDF2 configuration.
    #[must_use]
    pub fn kdf_params(&self) -> KdfParams {
        let Some(kind) = self.kdf else {
            return KdfParams::default_pbkdf2();
        };
        match kind {
            KdfKind::Pbkdf2Sha256 => KdfParams {
                kind,
                iterations: self
                    .kdf_iterations
                    .unwrap_or(hasp_crypto::DEFAULT_PBKDF2_ITERATIONS),
                memory_mib: None,
                parallelism: None,
            },
            KdfKind::Argon2id => KdfParams {
                kind,
                iterations: self
                    .kdf_iterations
                    .unwrap_or(hasp_crypto::DEFAULT_ARGON2_ITERATIONS),
                memory_mib: Some(
                    self.kdf_memory
                        .unwrap_or(hasp_crypto::DEFAULT_ARGON2_MEMORY_MIB),
                ),
                parallelism: Some(
                    self.kdf_parallelism
                        .unwrap_or(hasp_crypto::DEFAULT_ARGON2_PARALLELISM),
                ),
            },
        }
    }
}

/// The identity endpoint's three answer shapes.
#[derive(Debug, Clone)]
pub enum IdentityResponse {
    Captcha {
        site_key: String,
    },
    TwoFactor {
        offer: TwoFactorOffer,
        captcha_token: Option<String>,
    },
    Success(Box<TokenSuccess>),
}

/// Classify a raw identity-endpoint body. A site key short-circuits
/// everything else; a provider-offer map means a challenge; anything else
/// must parse as a success payload or the attempt dies with
/// `ProtocolViolation`.
#[instrument(level = "debug", skip(body))]
pub fn classify_identity_response(body: Value) -> Result<IdentityResponse, AuthError> {
    let object = body
        .as_object()
        .ok_or_else(|| AuthError::ProtocolViolation("identity response is not an object".into()))?;

    if let Some(site_key) = object.get("siteKey").and_then(Value::as_str) {
        return Ok(IdentityResponse::Captcha {
            site_key: site_key.to_string(),
        });
    }

    if let Some(providers) = object.get("twoFactorProviders2") {
        let map = providers.as_object().ok_or_else(|| {
            AuthError::ProtocolViolation("twoFactorProviders2 is not an object".into())
        })?;
        let offer = TwoFactorOffer::from_wire(map);
        if offer.is_empty() {
            return Err(AuthError::ProtocolViolation(
                "two-factor challenge offered no usable provider".into(),
            ));
        }
        let captcha_token = object
            .get("captchaToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(IdentityResponse::TwoFactor {
            offer,
            captcha_token,
        });
    }

    let success: TokenSuccess = serde_json::from_value(body)
        .map_err(|err| AuthError::ProtocolViolation(format!("malformed success payload: {err}")))?;
    if success.access_token.is_empty() {
        return Err(AuthError::ProtocolViolation(
            "success payload carries an empty access token".into(),
        ));
    }
    Ok(IdentityResponse::Success(Box::new(success)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device() -> DeviceInfo {
        DeviceInfo {
            app_id: "app-1".to_string(),
            device_type: 8,
            name: "test-device".to_string(),
        }
    }

    fn password_credential() -> CredentialSet {
        CredentialSet::Password {
            email: "user@example.com".to_string(),
            server_auth_hash: "server-hash".to_string(),
            local_hash: "local-hash".to_string(),
        }
    }

    #[test]
    fn inactive_credential_fields_are_absent_on_the_wire() {
        let request = TokenRequest::build(&password_credential(), &device(), None, None, None);
        let value = serde_json::to_value(&request).expect("serialize");
        let object = value.as_object().expect("object");
        assert_eq!(
            object.get("email").and_then(Value::as_str),
            Some("user@example.com")
        );
        assert!(object.contains_key("masterPasswordHash"));
        assert!(!object.contains_key("clientId"));
        assert!(!object.contains_key("code"));
        assert!(!object.contains_key("twoFactorProvider"));
        // The local hash never leaves the process.
        assert!(!value.to_string().contains("local-hash"));
    }

    #[test]
    fn explicit_two_factor_wins_over_remembered_token() {
        let submission = TwoFactorSubmission {
            provider: TwoFactorProvider::Authenticator,
            token: "123456".to_string(),
            remember: true,
        };
        let request = TokenRequest::build(
            &password_credential(),
            &device(),
            Some(&submission),
            Some("remembered"),
            None,
        );
        assert_eq!(
            request.two_factor_provider,
            Some(TwoFactorProvider::Authenticator)
        );
        assert_eq!(request.two_factor_token.as_deref(), Some("123456"));
        assert_eq!(request.two_factor_remember, Some(true));
    }

    #[test]
    fn remembered_token_rides_the_remember_provider() {
        let request = TokenRequest::build(
            &password_credential(),
            &device(),
            None,
            Some("remembered"),
            None,
        );
        assert_eq!(
            request.two_factor_provider,
            Some(TwoFactorProvider::Remember)
        );
        assert_eq!(request.two_factor_token.as_deref(), Some("remembered"));
        assert_eq!(request.two_factor_remember, Some(false));
    }

    #[test]
    fn no_two_factor_fields_without_answer_or_token() {
        let request = TokenRequest::build(&password_credential(), &device(), None, None, None);
        let value = serde_json::to_value(&request).expect("serialize");
        let object = value.as_object().expect("object");
        assert!(!object.contains_key("twoFactorProvider"));
        assert!(!object.contains_key("twoFactorToken"));
        assert!(!object.contains_key("twoFactorRemember"));
    }

    #[test]
    fn site_key_classifies_as_captcha() {
        let response = classify_identity_response(json!({"siteKey": "site-123"})).expect("classify");
        assert!(matches!(
            response,
            IdentityResponse::Captcha { site_key } if site_key == "site-123"
        ));
    }

    #[test]
    fn provider_offer_classifies_as_two_factor() {
        let body = json!({
            "twoFactorProviders2": {"1": {}},
            "captchaToken": "tok",
        });
        let response = classify_identity_response(body).expect("classify");
        match response {
            IdentityResponse::TwoFactor {
                offer,
                captcha_token,
            } => {
                assert!(offer.contains(TwoFactorProvider::Email));
                assert_eq!(captcha_token.as_deref(), Some("tok"));
            }
            other => panic!("expected two-factor, got {other:?}"),
        }
    }

    #[test]
    fn success_payload_parses() {
        let body = json!({
            "accessToken": "jwt",
            "refreshToken": "refresh",
            "expiresIn": 3600,
            "key": "v1.nonce.ct",
            "kdf": 0,
            "kdfIterations": 100000,
        });
        let response = classify_identity_response(body).expect("classify");
        match response {
            IdentityResponse::Success(success) => {
                assert_eq!(success.access_token, "jwt");
                assert_eq!(success.kdf_params().iterations, 100_000);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn malformed_body_is_a_protocol_violation() {
        assert!(matches!(
            classify_identity_response(json!("nope")),
            Err(AuthError::ProtocolViolation(_))
        ));
        assert!(matches!(
            classify_identity_response(json!({"unexpected": true})),
            Err(AuthError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn missing_kdf_fields_fall_back_to_default() {
        let body = json!({"accessToken": "jwt"});
        let IdentityResponse::Success(success) = classify_identity_response(body).expect("classify")
        else {
            panic!("expected success");
        };
        assert_eq!(success.kdf_params(), KdfParams::default_pbkdf2());
    }

    #[test]
    fn argon2_kdf_fields_round_trip() {
        let body = json!({
            "accessToken": "jwt",
            "kdf": 1,
            "kdfIterations": 4,
            "kdfMemory": 32,
            "kdfParallelism": 2,
        });
        let IdentityResponse::Success(success) = classify_identity_response(body).expect("classify")
        else {
            panic!("expected success");
        };
        let params = success.kdf_params();
        assert_eq!(params.kind, KdfKind::Argon2id);
        assert_eq!(params.iterations, 4);
        assert_eq!(params.memory_mib, Some(32));
        assert_eq!(params.parallelism, Some(2));
    }
}
