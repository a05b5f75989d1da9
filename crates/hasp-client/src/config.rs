use serde::{Deserialize, Serialize};

use hasp_core::{ClientOptions, DeviceIdentity, DeviceInfo};

fn default_device_name() -> String {
    "hasp".to_string()
}

/// Client-side endpoint and device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the identity service.
    pub identity_url: String,
    /// Default key-connector URL for responses that only set the use-flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_connector_url: Option<String>,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub device_type: i32,
}

impl ClientConfig {
    #[must_use]
    pub fn new(identity_url: impl Into<String>) -> Self {
        Self {
            identity_url: identity_url.into(),
            key_connector_url: None,
            device_name: default_device_name(),
            device_type: 0,
        }
    }

    #[must_use]
    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            handle_keys: true,
            key_connector_url: self.key_connector_url.clone(),
        }
    }
}

/// Device identity with a caller-provided installation id.
#[derive(Debug, Clone)]
pub struct StaticDeviceIdentity {
    app_id: String,
    device_type: i32,
    name: String,
}

impl StaticDeviceIdentity {
    #[must_use]
    pub fn new(app_id: impl Into<String>, device_type: i32, name: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            device_type,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ClientConfig, app_id: impl Into<String>) -> Self {
        Self::new(app_id, config.device_type, config.device_name.clone())
    }
}

impl DeviceIdentity for StaticDeviceIdentity {
    fn device(&self) -> DeviceInfo {
        DeviceInfo {
            app_id: self.app_id.clone(),
            device_type: self.device_type,
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_apply_on_deserialize() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"identity_url": "https://id.example.com"}"#).expect("parse");
        assert_eq!(config.device_name, "hasp");
        assert_eq!(config.device_type, 0);
        assert!(config.key_connector_url.is_none());
        assert!(config.options().handle_keys);
    }

    #[test]
    fn device_identity_reflects_config() {
        let mut config = ClientConfig::new("https://id.example.com");
        config.device_name = "workstation".to_string();
        config.device_type = 8;
        let identity = StaticDeviceIdentity::from_config(&config, "app-123");
        let device = identity.device();
        assert_eq!(device.app_id, "app-123");
        assert_eq!(device.device_type, 8);
        assert_eq!(device.name, "workstation");
    }
}
