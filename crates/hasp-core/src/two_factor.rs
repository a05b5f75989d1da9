use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum TwoFactorProvider {
    Authenticator = 0,
    Email = 1,
    Duo = 2,
    Yubikey = 3,
    U2f = 4,
    Remember = 5,
    OrganizationDuo = 6,
    WebAuthn = 7,
}

impl From<TwoFactorProvider> for i32 {
    fn from(value: TwoFactorProvider) -> Self {
        value as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub i32);

impl std::fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown two-factor provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl TryFrom<i32> for TwoFactorProvider {
    type Error = UnknownProvider;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Authenticator),
            1 => Ok(Self::Email),
            2 => Ok(Self::Duo),
            3 => Ok(Self::Yubikey),
            4 => Ok(Self::U2f),
            5 => Ok(Self::Remember),
            6 => Ok(Self::OrganizationDuo),
            7 => Ok(Self::WebAuthn),
            _ => Err(UnknownProvider(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub priority: i32,
    pub sort: i32,
    pub requires_premium: bool,
}

/// Static provider table as a pure lookup. `priority` picks the default
/// provider, `sort` orders the selection list.
#[must_use]
pub const fn provider_descriptor(provider: TwoFactorProvider) -> ProviderDescriptor {
    match provider {
        TwoFactorProvider::Authenticator => ProviderDescriptor {
            priority: 1,
            sort: 1,
            requires_premium: false,
        },
        TwoFactorProvider::Email => ProviderDescriptor {
            priority: 0,
            sort: 6,
            requires_premium: false,
        },
        TwoFactorProvider::Duo => ProviderDescriptor {
            priority: 2,
            sort: 2,
            requires_premium: true,
        },
        TwoFactorProvider::Yubikey => ProviderDescriptor {
            priority: 3,
            sort: 3,
            requires_premium: true,
        },
        TwoFactorProvider::U2f => ProviderDescriptor {
            priority: 4,
            sort: 4,
            requires_premium: true,
        },
        TwoFactorProvider::Remember => ProviderDescriptor {
            priority: -1,
            sort: 0,
            requires_premium: false,
        },
        TwoFactorProvider::OrganizationDuo => ProviderDescriptor {
            priority: 10,
            sort: 10,
            requires_premium: false,
        },
        TwoFactorProvider::WebAuthn => ProviderDescriptor {
            priority: 4,
            sort: 5,
            requires_premium: true,
        },
    }
}

/// Provider offers returned by the identity server, keyed by provider with
/// provider-specific parameters (empty object for e.g. email, a challenge
/// blob for hardware keys). Iteration order is the provider id order; the
/// selection tie-break relies on nothing beyond that being stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwoFactorOffer {
    providers: BTreeMap<TwoFactorProvider, Value>,
}

impl TwoFactorOffer {
    /// Builds an offer from the wire map. Keys the client does not know are
    /// skipped, not fatal: an older client must still log in against a
    /// server that offers newer providers.
    #[must_use]
    pub fn from_wire(map: &serde_json::Map<String, Value>) -> Self {
        let mut providers = BTreeMap::new();
        for (key, params) in map {
            let Ok(id) = key.parse::<i32>() else {
                debug!(key = %key, "skipping malformed two-factor provider key");
                continue;
            };
            match TwoFactorProvider::try_from(id) {
                Ok(provider) => {
                    providers.insert(provider, params.clone());
                }
                Err(err) => debug!(%err, "skipping unknown two-factor provider"),
            }
        }
        Self { providers }
    }

    pub fn insert(&mut self, provider: TwoFactorProvider, params: Value) {
        self.providers.insert(provider, params);
    }

    #[must_use]
    pub fn contains(&self, provider: TwoFactorProvider) -> bool {
        self.providers.contains_key(&provider)
    }

    #[must_use]
    pub fn params(&self, provider: TwoFactorProvider) -> Option<&Value> {
        self.providers.get(&provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = TwoFactorProvider> + '_ {
        self.providers.keys().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }
}

/// What this client build can actually present to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityFlags {
    pub webauthn_supported: bool,
    pub u2f_supported: bool,
    pub duo_supported: bool,
}

impl CapabilityFlags {
    #[must_use]
    pub const fn supports(&self, provider: TwoFactorProvider) -> bool {
        match provider {
            TwoFactorProvider::Authenticator | TwoFactorProvider::Email => true,
            TwoFactorProvider::Yubikey => true,
            TwoFactorProvider::Duo | TwoFactorProvider::OrganizationDuo => self.duo_supported,
            TwoFactorProvider::U2f => self.u2f_supported,
            TwoFactorProvider::WebAuthn => self.webauthn_supported,
            // Remember is a wire-level construct, never user-selectable.
            TwoFactorProvider::Remember => false,
        }
    }
}

/// A sticky prior selection wins as long as the server still offers it.
/// Otherwise the highest-priority offered provider this client supports is
/// chosen; ties keep the first one encountered.
#[must_use]
pub fn select_default_provider(
    offer: &TwoFactorOffer,
    sticky: Option<TwoFactorProvider>,
    caps: &CapabilityFlags,
) -> Option<TwoFactorProvider> {
    if let Some(previous) = sticky {
        if offer.contains(previous) {
            return Some(previous);
        }
    }

    let mut best: Option<(TwoFactorProvider, i32)> = None;
    for provider in offer.providers() {
        if !caps.supports(provider) {
            continue;
        }
        let descriptor = provider_descriptor(provider);
        match best {
            Some((_, priority)) if priority >= descriptor.priority => {}
            _ => best = Some((provider, descriptor.priority)),
        }
    }
    best.map(|(provider, _)| provider)
}

/// Offered providers this client supports, ordered by `sort` ascending for
/// presentation. Display itself is a caller concern.
#[must_use]
pub fn list_supported_providers(
    offer: &TwoFactorOffer,
    caps: &CapabilityFlags,
) -> Vec<TwoFactorProvider> {
    let mut providers: Vec<TwoFactorProvider> = offer
        .providers()
        .filter(|provider| caps.supports(*provider))
        .collect();
    providers.sort_by_key(|provider| provider_descriptor(*provider).sort);
    providers
}
