//! JWT verification for connection handshakes.
//!
//! Tokens are HS256-signed by the credential issuer with a `userId` and
//! `email` payload and an `exp` claim. A token that fails signature,
//! algorithm, or expiry checks never produces an `Identity`.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Identity;

/// Errors that can occur while verifying a credential
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credential")]
    MissingToken,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token is missing a user id")]
    MissingSubject,

    #[error("JWT decoding error: {0}")]
    Jwt(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => AuthError::InvalidToken,
            _ => AuthError::Jwt(err),
        }
    }
}

/// Claims carried by an issued credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier (`sub` accepted for standard-shaped tokens)
    #[serde(rename = "userId", alias = "sub")]
    pub user_id: String,
    /// Display identity
    #[serde(default)]
    pub email: String,
    /// Expiration timestamp
    pub exp: u64,
    /// Issued at timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

/// Verifies handshake credentials against the shared secret
#[derive(Clone)]
pub struct ConnectionAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl ConnectionAuthenticator {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a credential and decode the identity it carries
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        let claims = data.claims;

        if claims.user_id.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }

        Ok(Identity::new(claims.user_id, claims.email))
    }

    /// Verify an optional credential as supplied at handshake time
    pub fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }
}
