use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use hasp_crypto::KdfParams;

use crate::error::AuthError;
use crate::provision::ProvisionedAccount;
use crate::token::TokenRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub app_id: String,
    pub device_type: i32,
    pub name: String,
}

/// Identity claims carried by an access token.
#[derive(Debug, Clone)]
pub struct TokenClaims {
    pub sub: Uuid,
    pub email: String,
    pub premium: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysRequest {
    pub public_key: String,
    pub encrypted_private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetKeyConnectorKeyRequest {
    pub key: String,
    pub kdf: hasp_crypto::KdfKind,
    pub kdf_iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kdf_memory: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kdf_parallelism: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_identifier: Option<String>,
    pub keys: KeysRequest,
}

/// Prelogin lookup of a user's KDF parameters. `Ok(None)` is the defined
/// not-found outcome (callers fall back to defaults); transport failures
/// surface as `AuthError::Transient`.
#[async_trait]
pub trait PreloginLookup: Send + Sync {
    async fn lookup(&self, email: &str) -> Result<Option<KdfParams>, AuthError>;
}

/// The identity token endpoint. Returns the raw response body; the engine
/// classifies it (captcha / challenge / success) itself.
#[async_trait]
pub trait IdentityEndpoint: Send + Sync {
    async fn exchange(&self, request: &TokenRequest) -> Result<Value, AuthError>;
}

pub trait DeviceIdentity: Send + Sync {
    fn device(&self) -> DeviceInfo;
}

pub trait TokenDecoder: Send + Sync {
    fn decode(&self, access_token: &str) -> Result<TokenClaims, AuthError>;
}

/// Remembered-device two-factor tokens, keyed by account email.
#[async_trait]
pub trait TwoFactorTokenStore: Send + Sync {
    async fn get(&self, email: &str) -> Result<Option<String>, AuthError>;
    async fn set(&self, email: &str, token: &str) -> Result<(), AuthError>;
}

#[async_trait]
pub trait KeyConnectorClient: Send + Sync {
    async fn fetch_key(&self, access_token: &str, url: &str) -> Result<String, AuthError>;
    async fn push_key(
        &self,
        access_token: &str,
        url: &str,
        key_material_b64: &str,
    ) -> Result<(), AuthError>;
}

#[async_trait]
pub trait KeyRegistrationApi: Send + Sync {
    async fn register_key_pair(
        &self,
        access_token: &str,
        request: &KeysRequest,
    ) -> Result<(), AuthError>;
    async fn set_key_connector_key(
        &self,
        access_token: &str,
        request: &SetKeyConnectorKeyRequest,
    ) -> Result<(), AuthError>;
}

/// The only sink that durably stores session output; the engine never
/// writes storage directly and does not retain the account after handoff.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn materialize(&self, account: ProvisionedAccount) -> Result<(), AuthError>;
}

/// In-memory remembered-token store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryTwoFactorStore {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryTwoFactorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TwoFactorTokenStore for MemoryTwoFactorStore {
    async fn get(&self, email: &str) -> Result<Option<String>, AuthError> {
        let tokens = self
            .tokens
            .lock()
            .map_err(|_| AuthError::Transient("two-factor token store poisoned".into()))?;
        Ok(tokens.get(email).cloned())
    }

    async fn set(&self, email: &str, token: &str) -> Result<(), AuthError> {
        let mut tokens = self
            .tokens
            .lock()
            .map_err(|_| AuthError::Transient("two-factor token store poisoned".into()))?;
        tokens.insert(email.to_string(), token.to_string());
        Ok(())
    }
}
