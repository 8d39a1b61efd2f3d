/// ADMIN SECURITY LAYER
/// Admin token verification for sweep and address listing routes
use axum::http::HeaderMap;

use super::error::ApiError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Check a presented token against the configured one.
/// An unset or empty configured token rejects everything.
pub fn verify_admin_token(expected: Option<&str>, token: Option<&str>) -> bool {
    let expected = match expected {
        Some(t) if !t.is_empty() => t,
        _ => {
            tracing::warn!("[SECURITY] admin token not configured; admin routes are closed");
            return false;
        }
    };

    matches!(token, Some(t) if constant_time_eq(t.as_bytes(), expected.as_bytes()))
}

/// Reads X-Admin-Token from the request headers
pub fn require_admin(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    if !verify_admin_token(expected, token) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_unconfigured_token_rejects() {
        assert!(!verify_admin_token(None, Some("x")));
        assert!(!verify_admin_token(Some(""), Some("")));
    }

    #[test]
    fn test_header_must_match() {
        let mut headers = HeaderMap::new();
        assert!(require_admin(Some("s3cret"), &headers).is_err());
        headers.insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static("wrong"));
        assert!(require_admin(Some("s3cret"), &headers).is_err());
        headers.insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static("s3cret"));
        assert!(require_admin(Some("s3cret"), &headers).is_ok());
    }
}
