//! Connection authentication.
//!
//! This module handles:
//! - Extracting the bearer credential from the WebSocket handshake
//! - Verifying the HS256 signature and expiry against the shared secret
//! - Producing the `Identity` attached to an accepted connection
//!
//! Credentials are issued elsewhere; this service only verifies them.

mod jwt;

pub use jwt::ConnectionAuthenticator;

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::sync::UserId;

/// Query parameter carrying the credential for clients that cannot set headers
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Decoded identity of an authenticated connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }
}

/// Pull the bearer credential out of the handshake.
///
/// The `Authorization: Bearer` header wins over the query parameter.
pub fn bearer_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, token) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
        })
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    from_header.or_else(|| {
        query
            .get(TOKEN_QUERY_PARAM)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));

        assert_eq!(
            bearer_token(&headers, &HashMap::new()),
            Some("abc.def.ghi".to_string())
        );
    }

    #[test]
    fn test_bearer_from_query() {
        let mut query = HashMap::new();
        query.insert("token".to_string(), "from-query".to_string());

        assert_eq!(
            bearer_token(&HeaderMap::new(), &query),
            Some("from-query".to_string())
        );
    }

    #[test]
    fn test_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer header-token"));
        let mut query = HashMap::new();
        query.insert("token".to_string(), "query-token".to_string());

        assert_eq!(
            bearer_token(&headers, &query),
            Some("header-token".to_string())
        );
    }

    #[test]
    fn test_missing_or_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers, &HashMap::new()), None);

        let mut query = HashMap::new();
        query.insert("token".to_string(), "  ".to_string());
        assert_eq!(bearer_token(&HeaderMap::new(), &query), None);
    }
}
