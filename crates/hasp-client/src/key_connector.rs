use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hasp_core::{AuthError, KeyConnectorClient};

#[derive(Debug, Serialize, Deserialize)]
struct UserKeyBody {
    key: String,
}

/// HTTP key-connector client. The connector custodies master-key material
/// for SSO-only accounts; the engine decides when a failure is fatal.
#[derive(Debug, Clone)]
pub struct HttpKeyConnector {
    client: reqwest::Client,
}

impl HttpKeyConnector {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn endpoint(url: &str) -> String {
        format!("{}/user-keys", url.trim_end_matches('/'))
    }
}

#[async_trait]
impl KeyConnectorClient for HttpKeyConnector {
    async fn fetch_key(&self, access_token: &str, url: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .get(Self::endpoint(url))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(|err| AuthError::Transient(format!("key connector fetch failed: {err}")))?;
        if !response.status().is_success() {
            return Err(AuthError::Transient(format!(
                "key connector fetch failed: {}",
                response.status()
            )));
        }
        let body: UserKeyBody = response.json().await.map_err(|err| {
            AuthError::ProtocolViolation(format!("malformed key connector response: {err}"))
        })?;
        debug!("fetched key material from key connector");
        Ok(body.key)
    }

    async fn push_key(
        &self,
        access_token: &str,
        url: &str,
        key_material_b64: &str,
    ) -> Result<(), AuthError> {
        let response = self
            .client
            .post(Self::endpoint(url))
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .json(&UserKeyBody {
                key: key_material_b64.to_string(),
            })
            .send()
            .await
            .map_err(|err| AuthError::Transient(format!("key connector push failed: {err}")))?;
        if !response.status().is_success() {
            return Err(AuthError::Transient(format!(
                "key connector push failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}
