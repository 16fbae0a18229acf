//! Authentication middleware for the file routes.

use super::AuthError;
use crate::{models::subject::Subject, state::AppState};
use axum::{
    Json,
    extract::{FromRequestParts, Request, State},
    http::{
        HeaderValue, StatusCode,
        header::{AUTHORIZATION, WWW_AUTHENTICATE},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Extracts the bearer token from the Authorization header.
fn extract_bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware that validates access tokens.
///
/// This middleware:
/// 1. Extracts the Bearer token from the Authorization header
/// 2. Validates it (JWT or introspection) and checks the required scope
/// 3. Stores the resulting [`Subject`] in request extensions for handlers
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
        .map(str::to_owned);

    let Some(token) = token else {
        return rejection(&AuthError::MissingToken);
    };

    match state.auth.authenticate(&token).await {
        Ok(subject) => {
            request.extensions_mut().insert(subject);
            next.run(request).await
        }
        Err(err) => rejection(&err),
    }
}

fn rejection(err: &AuthError) -> Response {
    let (status, error) = match err {
        AuthError::MissingScope(_) => (StatusCode::FORBIDDEN, "insufficient_scope"),
        AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "missing_token"),
        AuthError::Expired => (StatusCode::UNAUTHORIZED, "token_expired"),
        AuthError::Introspection(source) => {
            tracing::error!(error = %source, "token introspection request failed");
            (StatusCode::UNAUTHORIZED, "invalid_token")
        }
        _ => (StatusCode::UNAUTHORIZED, "invalid_token"),
    };
    tracing::debug!(error = %err, "rejecting request");

    let mut response = (
        status,
        Json(json!({ "error": error, "message": err.to_string() })),
    )
        .into_response();
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}

/// Extractor for the authenticated subject.
///
/// Only valid behind [`auth_middleware`]; elsewhere it rejects with 401.
#[derive(Debug, Clone)]
pub struct AuthSubject(pub Subject);

impl<S> FromRequestParts<S> for AuthSubject
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Subject>()
            .cloned()
            .map(AuthSubject)
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({
                        "error": "unauthorized",
                        "message": "Authentication required"
                    })),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_variants() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }

    #[test]
    fn scope_failure_is_forbidden() {
        let response = rejection(&AuthError::MissingScope("VLO_BOARDS".into()));
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn invalid_token_is_unauthorized_with_challenge() {
        let response = rejection(&AuthError::InvalidToken("bad signature".into()));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
    }
}
