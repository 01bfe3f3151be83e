use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{AppState, Error};

pub const TOKEN_HEADER: &str = "x-kasa-token";

/// Token from `X-Kasa-Token`, or `Authorization: Bearer <token>`.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Axum middleware: the server must be unsealed and the request must carry
/// the root token.
pub async fn require_root_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(e) = state.core.require_unsealed() {
        return e.into_response();
    }
    let verified = match extract_token(request.headers()) {
        Some(token) => state.core.verify_root_token(token),
        None => Err(Error::PermissionDenied),
    };
    match verified {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_token(&headers), Some("abc"));

        headers.insert(TOKEN_HEADER, HeaderValue::from_static("xyz"));
        assert_eq!(extract_token(&headers), Some("xyz"));

        headers.insert(TOKEN_HEADER, HeaderValue::from_static("  "));
        assert_eq!(extract_token(&headers), None);
    }
}
