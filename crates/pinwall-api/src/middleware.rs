use std::time::Duration;

use axum::http::{
    HeaderMap, HeaderName, HeaderValue, Method,
    header::{self, AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::error::ApiError;

const X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

/// Check the Authorization header against the configured admin key. A bare
/// key and `Bearer <key>` are both accepted.
pub fn authorize_admin(headers: &HeaderMap, admin_api_key: &str) -> Result<(), ApiError> {
    let supplied = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let supplied = supplied.strip_prefix("Bearer ").unwrap_or(supplied);

    if admin_api_key.is_empty() || !constant_time_eq(supplied.as_bytes(), admin_api_key.as_bytes()) {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// The one CORS policy for every route, built from the configured origin list.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, X_REQUESTED_WITH])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86_400))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn accepts_bare_and_bearer_key() {
        assert!(authorize_admin(&headers("s3cret-key"), "s3cret-key").is_ok());
        assert!(authorize_admin(&headers("Bearer s3cret-key"), "s3cret-key").is_ok());
    }

    #[test]
    fn rejects_missing_or_wrong_key() {
        assert!(matches!(
            authorize_admin(&HeaderMap::new(), "s3cret-key"),
            Err(ApiError::Unauthorized)
        ));
        assert!(authorize_admin(&headers("s3cret-kez"), "s3cret-key").is_err());
        assert!(authorize_admin(&headers("s3cret"), "s3cret-key").is_err());
    }

    #[test]
    fn empty_configured_key_never_matches() {
        assert!(authorize_admin(&headers(""), "").is_err());
    }
}
