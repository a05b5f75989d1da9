use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use hasp_core::{AuthError, TokenClaims, TokenDecoder};

#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    email: String,
    #[serde(default)]
    premium: bool,
}

/// Claims-only access-token decode. The client never holds the identity
/// server's signing key, so the signature is not verified here; the token
/// is only trusted as far as the TLS channel it arrived on.
#[derive(Debug, Clone, Default)]
pub struct JwtTokenDecoder;

impl JwtTokenDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TokenDecoder for JwtTokenDecoder {
    fn decode(&self, access_token: &str) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims::<&str>(&[]);

        let data = decode::<AccessTokenClaims>(
            access_token,
            &DecodingKey::from_secret(&[]),
            &validation,
        )
        .map_err(|err| AuthError::ProtocolViolation(format!("undecodable access token: {err}")))?;

        let sub = Uuid::parse_str(&data.claims.sub).map_err(|_| {
            AuthError::ProtocolViolation("access token subject is not a user id".into())
        })?;
        Ok(TokenClaims {
            sub,
            email: data.claims.email,
            premium: data.claims.premium,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;

    fn token(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        let signature = URL_SAFE_NO_PAD.encode(b"unverified");
        format!("{header}.{body}.{signature}")
    }

    #[test]
    fn decodes_identity_claims() {
        let token = token(json!({
            "sub": "019035e5-79cf-7f22-8d8f-8a7e5b6c4d2e",
            "email": "user@example.com",
            "premium": true,
        }));
        let claims = JwtTokenDecoder::new().decode(&token).expect("decode");
        assert_eq!(claims.email, "user@example.com");
        assert!(claims.premium);
        assert_eq!(
            claims.sub.to_string(),
            "019035e5-79cf-7f22-8d8f-8a7e5b6c4d2e"
        );
    }

    #[test]
    fn missing_premium_defaults_to_false() {
        let token = token(json!({
            "sub": "019035e5-79cf-7f22-8d8f-8a7e5b6c4d2e",
            "email": "user@example.com",
        }));
        let claims = JwtTokenDecoder::new().decode(&token).expect("decode");
        assert!(!claims.premium);
    }

    #[test]
    fn malformed_token_is_a_protocol_violation() {
        let result = JwtTokenDecoder::new().decode("not-a-jwt");
        assert!(matches!(result, Err(AuthError::ProtocolViolation(_))));
    }

    #[test]
    fn non_uuid_subject_is_a_protocol_violation() {
        let token = token(json!({
            "sub": "service-account",
            "email": "user@example.com",
        }));
        let result = JwtTokenDecoder::new().decode(&token);
        assert!(matches!(result, Err(AuthError::ProtocolViolation(_))));
    }
}
