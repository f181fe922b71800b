use std::collections::HashSet;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use collab_core::{GatewayError, GatewayResult, Principal};

use crate::config::JwtConfig;

/// Shape of the JWT claims this gateway extracts a `Principal` from. Any
/// other claim present on the token is ignored.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    preferred_username: Option<String>,
    email: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    #[serde(default)]
    realm_access: RealmAccess,
}

#[derive(Debug, Default, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

/// Validates a bearer token and extracts a `Principal`. Rejects empty,
/// malformed, signature-invalid, or expired tokens, and (when the config
/// names a non-default issuer/audience) mismatched ones. Never includes the
/// raw token in its error.
pub fn validate_token(config: &JwtConfig, token: &str) -> GatewayResult<Principal> {
    if token.trim().is_empty() {
        return Err(GatewayError::JwtMissing);
    }

    let key = decoding_key(config)?;
    let validator = validator(config)?;

    let claims = jsonwebtoken::decode::<Claims>(token, &key, &validator)
        .map_err(|e| classify(&e))?
        .claims;

    if claims.sub.trim().is_empty() {
        return Err(GatewayError::JwtInvalid("missing sub claim".to_string()));
    }

    let username = claims
        .preferred_username
        .or_else(|| claims.email.clone())
        .unwrap_or_else(|| format!("user_{}", claims.sub));

    let full_name = match (&claims.given_name, &claims.family_name) {
        (Some(g), Some(f)) => Some(format!("{g} {f}")),
        _ => None,
    };

    let roles: HashSet<String> = claims.realm_access.roles.into_iter().collect();

    debug!(user_id = %claims.sub, "token validated");

    Ok(Principal {
        user_id: claims.sub,
        username,
        email: claims.email,
        full_name,
        roles,
    })
}

fn decoding_key(config: &JwtConfig) -> GatewayResult<DecodingKey> {
    match config.format.as_str() {
        "HMAC" => Ok(DecodingKey::from_secret(config.secret.as_bytes())),
        "HMACB64" => DecodingKey::from_base64_secret(&config.secret)
            .map_err(|_| GatewayError::Config("jwt secret is not valid base64".to_string())),
        "ECDSA" => DecodingKey::from_ec_pem(config.secret.as_bytes())
            .map_err(|_| GatewayError::Config("jwt key is not valid PEM".to_string())),
        "RSA" => DecodingKey::from_rsa_pem(config.secret.as_bytes())
            .map_err(|_| GatewayError::Config("jwt key is not valid PEM".to_string())),
        other => Err(GatewayError::Config(format!("unsupported jwt format: {other}"))),
    }
}

fn validator(config: &JwtConfig) -> GatewayResult<Validation> {
    let alg: Algorithm = config
        .algorithm
        .parse()
        .map_err(|_| GatewayError::Config(format!("unrecognized jwt algorithm: {}", config.algorithm)))?;

    let mut validation = Validation::new(alg);
    let mut required = vec!["sub".to_string(), "exp".to_string()];

    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
        required.push("iss".to_string());
    }
    if let Some(audience) = &config.audience {
        validation.set_audience(&[audience]);
        required.push("aud".to_string());
    }
    validation.set_required_spec_claims(&required);

    Ok(validation)
}

fn classify(err: &jsonwebtoken::errors::Error) -> GatewayError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => GatewayError::JwtExpired,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
            GatewayError::JwtInvalid(err.to_string())
        }
        _ => GatewayError::JwtInvalid(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            format: "HMAC".to_string(),
            algorithm: "HS256".to_string(),
            issuer: None,
            audience: None,
        }
    }

    #[derive(Serialize)]
    struct RawClaims {
        sub: String,
        exp: u64,
        preferred_username: Option<String>,
    }

    fn token(claims: &RawClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = validate_token(&config(), "").unwrap_err();
        assert!(matches!(err, GatewayError::JwtMissing));
    }

    #[test]
    fn valid_token_extracts_principal() {
        let claims = RawClaims {
            sub: "user-1".to_string(),
            exp: future_exp(),
            preferred_username: Some("alice".to_string()),
        };
        let t = token(&claims, "test-secret");
        let principal = validate_token(&config(), &t).unwrap();
        assert_eq!(principal.user_id, "user-1");
        assert_eq!(principal.username, "alice");
    }

    #[test]
    fn missing_preferred_username_falls_back_to_user_prefix() {
        let claims = RawClaims {
            sub: "user-2".to_string(),
            exp: future_exp(),
            preferred_username: None,
        };
        let t = token(&claims, "test-secret");
        let principal = validate_token(&config(), &t).unwrap();
        assert_eq!(principal.username, "user_user-2");
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let claims = RawClaims {
            sub: "user-1".to_string(),
            exp: future_exp(),
            preferred_username: None,
        };
        let t = token(&claims, "wrong-secret");
        let err = validate_token(&config(), &t).unwrap_err();
        assert!(matches!(err, GatewayError::JwtInvalid(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = RawClaims {
            sub: "user-1".to_string(),
            exp: 1,
            preferred_username: None,
        };
        let t = token(&claims, "test-secret");
        let err = validate_token(&config(), &t).unwrap_err();
        assert!(matches!(err, GatewayError::JwtExpired));
    }
}
