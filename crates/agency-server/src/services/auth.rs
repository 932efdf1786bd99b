//! Access token verification
//!
//! Tokens are issued by Supabase Auth and signed HS256 with the project's
//! JWT secret, so they can be verified locally without a network call.

use agency_core::{AgencyError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Caller identity taken from a verified token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String, // user_id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    aud: String,
    exp: i64, // expiration time
    iat: i64, // issued at
}

pub struct AuthService {
    jwt_secret: String,
    audience: String,
}

impl AuthService {
    pub fn new(jwt_secret: String, audience: String) -> Self {
        Self {
            jwt_secret,
            audience,
        }
    }

    pub fn validate_token(&self, token: &str) -> Result<AuthUser> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AgencyError::Unauthorized(format!("Invalid token: {}", e)))?;

        let claims = token_data.claims;
        if claims.sub.is_empty() {
            return Err(AgencyError::Unauthorized("Token has no subject".to_string()));
        }

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }

    /// Mint a token shaped like the ones Supabase Auth issues
    pub fn issue_token(&self, user_id: &str, email: Option<&str>, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.map(String::from),
            role: Some("authenticated".to_string()),
            aud: self.audience.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AgencyError::Unauthorized(format!("Failed to sign token: {}", e)))
    }
}
