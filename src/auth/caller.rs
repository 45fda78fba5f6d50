use axum::{
    extract::Request,
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use super::AuthError;
use crate::scheduler::CallerCredential;

/// Header carrying the authenticated organization.
pub const ORG_ID_HEADER: &str = "X-Org-Id";

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub org_id: Uuid,
    pub credential: CallerCredential,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let authorization = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingCredentials)?
            .to_str()
            .map_err(|_| AuthError::InvalidCredentials)?;
        let token = authorization
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidCredentials)?;

        let org_id = headers
            .get(ORG_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .filter(|id| !id.is_nil())
            .ok_or(AuthError::MissingIdentity)?;

        Ok(Self {
            org_id,
            credential: CallerCredential::new(token),
        })
    }
}

/// Middleware that rejects unauthenticated requests and stores the
/// [`Caller`] in request extensions.
pub async fn caller_auth_middleware(mut req: Request, next: Next) -> Result<Response, AuthError> {
    let caller = Caller::from_headers(req.headers())?;
    tracing::debug!(org_id = %caller.org_id, "Request authenticated");
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    const ORG: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

    fn headers(auth: Option<&str>, org: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(auth) = auth {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        }
        if let Some(org) = org {
            headers.insert(ORG_ID_HEADER, HeaderValue::from_str(org).unwrap());
        }
        headers
    }

    #[test]
    fn test_caller_from_headers() {
        let caller = Caller::from_headers(&headers(Some("Bearer tok-123"), Some(ORG))).unwrap();
        assert_eq!(caller.org_id.to_string(), ORG);
        assert_eq!(caller.credential.token(), "tok-123");
    }

    #[test]
    fn test_missing_or_malformed_credentials() {
        assert!(matches!(
            Caller::from_headers(&headers(None, Some(ORG))),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            Caller::from_headers(&headers(Some("Basic dXNlcg=="), Some(ORG))),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            Caller::from_headers(&headers(Some("Bearer "), Some(ORG))),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_missing_or_nil_org() {
        assert!(matches!(
            Caller::from_headers(&headers(Some("Bearer t"), None)),
            Err(AuthError::MissingIdentity)
        ));
        assert!(matches!(
            Caller::from_headers(&headers(Some("Bearer t"), Some("not-a-uuid"))),
            Err(AuthError::MissingIdentity)
        ));
        assert!(matches!(
            Caller::from_headers(&headers(
                Some("Bearer t"),
                Some("00000000-0000-0000-0000-000000000000")
            )),
            Err(AuthError::MissingIdentity)
        ));
    }
}
