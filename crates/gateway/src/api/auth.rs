//! Identity resolution for the turn endpoint.
//!
//! The core never authenticates a token itself — that happens in whatever
//! sits in front of this service (a reverse proxy, an API gateway). All the
//! core does is read the already-issued bearer token out of the standard
//! header and treat it as the resolved `user_id`: everything downstream
//! (sessions, memory, chart locks) is keyed off that string.

use axum::http::HeaderMap;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    Missing,
    #[error("Authorization header is not a valid bearer token")]
    Malformed,
}

/// Extract the resolved user id from a `Authorization: Bearer <token>` header.
pub fn resolve_user_id(headers: &HeaderMap) -> Result<String, AuthError> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::Malformed)?;

    let token = raw.strip_prefix("Bearer ").ok_or(AuthError::Malformed)?.trim();
    if token.is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn resolves_user_id_from_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer user-123"),
        );
        assert_eq!(resolve_user_id(&headers).unwrap(), "user-123");
    }

    #[test]
    fn missing_header_is_an_error() {
        let headers = HeaderMap::new();
        assert!(matches!(resolve_user_id(&headers), Err(AuthError::Missing)));
    }

    #[test]
    fn non_bearer_scheme_is_malformed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert!(matches!(resolve_user_id(&headers), Err(AuthError::Malformed)));
    }

    #[test]
    fn empty_token_is_malformed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer "),
        );
        assert!(matches!(resolve_user_id(&headers), Err(AuthError::Malformed)));
    }
}
