//! Identity collaborator: bearer credential → stable user id.
//!
//! The login handshake and token issuance live outside the core; the core
//! only requires this contract. Both entry points consume it identically:
//! the chat endpoint reads a bearer header, the streaming endpoint accepts
//! the token via query parameter or bearer header.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CalvoxError, Result};

/// Resolve a bearer credential to a user id, or fail with `Unauthenticated`.
pub trait Identity: Send + Sync {
    fn verify(&self, token: &str) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    jti: String,
}

/// HS256 session tokens: `sub` carries the user id, `exp` bounds the
/// session lifetime at 24 hours.
pub struct SessionAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SessionAuth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a session token for a user. Used by the login flow and tests.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| CalvoxError::Config(format!("token encoding failed: {e}")))
    }
}

impl Identity for SessionAuth {
    fn verify(&self, token: &str) -> Result<String> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| CalvoxError::Unauthenticated)?;
        Ok(data.claims.sub)
    }
}
