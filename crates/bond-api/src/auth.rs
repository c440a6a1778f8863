use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use bond_common::{BondError, UserId};

use crate::error::ApiError;

/// Header carrying the caller's identity, set by the identity provider in front of us
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller. The identity is trusted as-is.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

fn identity_from_headers(headers: &HeaderMap) -> Option<UserId> {
    let from_header = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let from_bearer = || {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|id| !id.is_empty())
    };

    from_header.or_else(from_bearer).map(UserId::new)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_headers(&parts.headers)
            .map(AuthUser)
            .ok_or(ApiError::Bond(BondError::Unauthenticated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_sources() {
        let mut headers = HeaderMap::new();
        assert!(identity_from_headers(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer carol"));
        assert_eq!(identity_from_headers(&headers), Some(UserId::new("carol")));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(identity_from_headers(&headers), Some(UserId::new("alice")));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(identity_from_headers(&headers), Some(UserId::new("carol")));
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6"));
        assert!(identity_from_headers(&headers).is_none());
    }
}
