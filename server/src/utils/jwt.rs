use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::{Role, UserId};
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    #[serde(default)]
    pub roles: Vec<Role>,
    pub exp: i64,
}

/// HS256 keys derived once from `JWT_SECRET`. Tokens are issued by the
/// account service; this one only needs to read them.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: UserId, roles: &[Role], ttl: Duration) -> Result<String, AppError> {
        let claims = Claims {
            sub: user_id,
            roles: roles.to_vec(),
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::InternalServerError(format!("Failed to issue token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| AppError::AuthError(format!("Invalid token: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify_token() {
        let keys = JwtKeys::new("test-secret");
        let token = keys
            .issue(123, &[Role::Participant], Duration::hours(1))
            .unwrap();
        let claims = keys.verify(&token).unwrap();

        assert_eq!(claims.sub, 123);
        assert_eq!(claims.roles, vec![Role::Participant]);
    }

    #[test]
    fn test_invalid_and_foreign_tokens_are_rejected() {
        let keys = JwtKeys::new("test-secret");
        assert!(matches!(
            keys.verify("invalid.token.here"),
            Err(AppError::AuthError(_))
        ));

        let foreign = JwtKeys::new("other-secret")
            .issue(1, &[], Duration::hours(1))
            .unwrap();
        assert!(keys.verify(&foreign).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let keys = JwtKeys::new("test-secret");
        let token = keys.issue(1, &[], Duration::hours(-2)).unwrap();
        assert!(keys.verify(&token).is_err());
    }
}
