use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use hasp_core::{
    AuthError, IdentityEndpoint, KeyRegistrationApi, KeysRequest, PreloginLookup,
    SetKeyConnectorKeyRequest, TokenRequest,
};
use hasp_crypto::{KdfKind, KdfParams};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PreloginRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreloginResponse {
    kdf: KdfKind,
    kdf_iterations: u32,
    #[serde(default)]
    kdf_memory: Option<u32>,
    #[serde(default)]
    kdf_parallelism: Option<u32>,
}

impl PreloginResponse {
    fn into_params(self) -> KdfParams {
        KdfParams {
            kind: self.kdf,
            iterations: self.kdf_iterations,
            memory_mib: self.kdf_memory,
            parallelism: self.kdf_parallelism,
        }
    }
}

/// HTTP client for the identity service: prelogin, token exchange and key
/// registration endpoints.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: reqwest::Client,
    base_url: String,
}

impl IdentityClient {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }
}

fn transport_error(err: reqwest::Error) -> AuthError {
    AuthError::Transient(format!("identity request failed: {err}"))
}

#[async_trait]
impl PreloginLookup for IdentityClient {
    async fn lookup(&self, email: &str) -> Result<Option<KdfParams>, AuthError> {
        let response = self
            .client
            .post(self.endpoint("accounts/prelogin"))
            .json(&PreloginRequest { email })
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("prelogin has no record for this email");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AuthError::Transient(format!(
                "prelogin failed: {}",
                response.status()
            )));
        }
        let body: PreloginResponse = response.json().await.map_err(|err| {
            AuthError::ProtocolViolation(format!("malformed prelogin response: {err}"))
        })?;
        Ok(Some(body.into_params()))
    }
}

#[async_trait]
impl IdentityEndpoint for IdentityClient {
    async fn exchange(&self, request: &TokenRequest) -> Result<Value, AuthError> {
        let response = self
            .client
            .post(self.endpoint("connect/token"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AuthError::Transient(format!(
                "identity endpoint unavailable: {status}"
            )));
        }

        let body: Value = response.json().await.map_err(|err| {
            if status.is_success() {
                AuthError::ProtocolViolation(format!("malformed identity response: {err}"))
            } else {
                AuthError::Transient(format!("identity endpoint rejected login: {status}"))
            }
        })?;

        // Challenges and captcha demands arrive on non-2xx statuses with
        // structured bodies; only bodies without a recognizable shape are
        // treated as plain rejections.
        if status.is_success()
            || body.get("siteKey").is_some()
            || body.get("twoFactorProviders2").is_some()
        {
            Ok(body)
        } else {
            let detail = body
                .get("error_description")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(AuthError::Transient(format!(
                "identity endpoint rejected login: {status} {detail}"
            )))
        }
    }
}

#[async_trait]
impl KeyRegistrationApi for IdentityClient {
    async fn register_key_pair(
        &self,
        access_token: &str,
        request: &KeysRequest,
    ) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.endpoint("accounts/keys"))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(AuthError::Transient(format!(
                "key pair registration failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn set_key_connector_key(
        &self,
        access_token: &str,
        request: &SetKeyConnectorKeyRequest,
    ) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.endpoint("accounts/set-key-connector-key"))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(AuthError::Transient(format!(
                "set-key-connector-key failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client(server: &Server) -> IdentityClient {
        IdentityClient::new(reqwest::Client::new(), server.url())
    }

    #[tokio::test]
    async fn prelogin_not_found_yields_none() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/accounts/prelogin")
            .with_status(404)
            .create_async()
            .await;

        let result = client(&server)
            .lookup("user@example.com")
            .await
            .expect("lookup");
        assert_eq!(result, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn prelogin_returns_kdf_params() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/accounts/prelogin")
            .match_body(Matcher::Json(json!({"email": "user@example.com"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kdf": 1, "kdfIterations": 3, "kdfMemory": 64, "kdfParallelism": 4}"#)
            .create_async()
            .await;

        let params = client(&server)
            .lookup("user@example.com")
            .await
            .expect("lookup")
            .expect("params");
        assert_eq!(params.kind, KdfKind::Argon2id);
        assert_eq!(params.iterations, 3);
        assert_eq!(params.memory_mib, Some(64));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn prelogin_server_error_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/accounts/prelogin")
            .with_status(500)
            .create_async()
            .await;

        let result = client(&server).lookup("user@example.com").await;
        assert!(matches!(result, Err(AuthError::Transient(_))));
    }

    fn token_request() -> TokenRequest {
        use hasp_core::{CredentialSet, DeviceInfo};
        TokenRequest::build(
            &CredentialSet::ApiKey {
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
            },
            &DeviceInfo {
                app_id: "app-1".to_string(),
                device_type: 8,
                name: "test".to_string(),
            },
            None,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn token_exchange_passes_the_body_through() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/connect/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken": "jwt", "refreshToken": "refresh"}"#)
            .create_async()
            .await;

        let body = client(&server)
            .exchange(&token_request())
            .await
            .expect("exchange");
        assert_eq!(body.get("accessToken").and_then(Value::as_str), Some("jwt"));
    }

    #[tokio::test]
    async fn two_factor_challenge_on_400_still_returns_the_body() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/connect/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"twoFactorProviders2": {"1": {}}}"#)
            .create_async()
            .await;

        let body = client(&server)
            .exchange(&token_request())
            .await
            .expect("exchange");
        assert!(body.get("twoFactorProviders2").is_some());
    }

    #[tokio::test]
    async fn plain_rejection_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/connect/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "invalid_grant", "error_description": "bad credentials"}"#)
            .create_async()
            .await;

        let result = client(&server).exchange(&token_request()).await;
        match result {
            Err(AuthError::Transient(message)) => assert!(message.contains("bad credentials")),
            other => panic!("expected transient rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/connect/token")
            .with_status(502)
            .create_async()
            .await;

        let result = client(&server).exchange(&token_request()).await;
        assert!(matches!(result, Err(AuthError::Transient(_))));
    }

    #[tokio::test]
    async fn key_pair_registration_sends_bearer_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/accounts/keys")
            .match_header("authorization", "Bearer jwt-access")
            .match_body(Matcher::Json(json!({
                "publicKey": "pub",
                "encryptedPrivateKey": "priv",
            })))
            .with_status(200)
            .create_async()
            .await;

        client(&server)
            .register_key_pair(
                "jwt-access",
                &KeysRequest {
                    public_key: "pub".to_string(),
                    encrypted_private_key: "priv".to_string(),
                },
            )
            .await
            .expect("register");
        mock.assert_async().await;
    }
}
