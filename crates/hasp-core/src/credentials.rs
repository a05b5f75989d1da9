/// Exactly one credential form is in play for a login attempt. The wire
/// encoder serializes only the active variant's fields, so a request can
/// never carry both password and API-key material.
#[derive(Clone)]
pub enum CredentialSet {
    Password {
        email: String,
        server_auth_hash: String,
        local_hash: String,
    },
    Sso {
        code: String,
        code_verifier: String,
        redirect_url: String,
        org_id: Option<String>,
    },
    ApiKey {
        client_id: String,
        client_secret: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Password,
    Sso,
    ApiKey,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password => write!(f, "password"),
            Self::Sso => write!(f, "sso"),
            Self::ApiKey => write!(f, "api_key"),
        }
    }
}

impl CredentialSet {
    #[must_use]
    pub const fn kind(&self) -> CredentialKind {
        match self {
            Self::Password { .. } => CredentialKind::Password,
            Self::Sso { .. } => CredentialKind::Sso,
            Self::ApiKey { .. } => CredentialKind::ApiKey,
        }
    }

    /// Only the password path knows the account email before token decode.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::Password { email, .. } => Some(email),
            _ => None,
        }
    }

    #[must_use]
    pub fn org_id(&self) -> Option<&str> {
        match self {
            Self::Sso { org_id, .. } => org_id.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn api_key_identity(&self) -> Option<(&str, &str)> {
        match self {
            Self::ApiKey {
                client_id,
                client_secret,
            } => Some((client_id, client_secret)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CredentialSet::{}(REDACTED)", self.kind())
    }
}
