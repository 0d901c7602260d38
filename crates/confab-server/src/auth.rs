use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

/// Token verification failure. The message is sent verbatim as the
/// 401 response body.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct AuthError(String);

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    admin: serde_json::Value,
}

/// Verifies HS256 tokens against the shared secret and extracts the
/// `admin` claim.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Tokens without an exp claim are accepted; expired ones fail.
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a token and report whether it grants admin. Any truthy
    /// `admin` claim value counts as a grant; unverified tokens never
    /// do.
    pub fn verify_admin(&self, token: &str) -> Result<bool, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError(e.to_string()))?;
        Ok(claim_is_truthy(&data.claims.admin))
    }
}

fn claim_is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(claims: serde_json::Value) -> String {
        token_with_secret(claims, SECRET)
    }

    fn token_with_secret(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 3600
    }

    #[test]
    fn admin_true_grants_admin() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token(serde_json::json!({"admin": true}));
        assert!(verifier.verify_admin(&token).unwrap());
    }

    #[test]
    fn admin_false_or_absent_denies() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(!verifier
            .verify_admin(&token(serde_json::json!({"admin": false})))
            .unwrap());
        assert!(!verifier
            .verify_admin(&token(serde_json::json!({"user": "alice"})))
            .unwrap());
    }

    #[test]
    fn truthy_non_boolean_claims_grant_admin() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(verifier
            .verify_admin(&token(serde_json::json!({"admin": "yes"})))
            .unwrap());
        assert!(verifier
            .verify_admin(&token(serde_json::json!({"admin": 1})))
            .unwrap());
        assert!(verifier
            .verify_admin(&token(serde_json::json!({"admin": {"level": 2}})))
            .unwrap());
    }

    #[test]
    fn falsy_non_boolean_claims_deny() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(!verifier
            .verify_admin(&token(serde_json::json!({"admin": 0})))
            .unwrap());
        assert!(!verifier
            .verify_admin(&token(serde_json::json!({"admin": ""})))
            .unwrap());
        assert!(!verifier
            .verify_admin(&token(serde_json::json!({"admin": null})))
            .unwrap());
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token_with_secret(serde_json::json!({"admin": true}), "other-secret");
        assert!(verifier.verify_admin(&token).is_err());
    }

    #[test]
    fn garbage_token_fails_verification() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(verifier.verify_admin("not-a-jwt").is_err());
    }

    #[test]
    fn expired_token_fails_verification() {
        let verifier = TokenVerifier::new(SECRET);
        // Well past the default leeway.
        let token = token(serde_json::json!({"admin": true, "exp": 1_000_000}));
        let err = verifier.verify_admin(&token).unwrap_err();
        assert!(err.to_string().contains("Expired"), "got: {err}");
    }

    #[test]
    fn token_with_future_exp_verifies() {
        let verifier = TokenVerifier::new(SECRET);
        let token = token(serde_json::json!({"admin": true, "exp": future_exp()}));
        assert!(verifier.verify_admin(&token).unwrap());
    }
}
