//! Bearer-token auth middleware (§6): two independent schemes, one for the
//! management surface (`/instances*` minus `/proxy/*`) and one for the
//! data-plane proxy surface. Each is only enforced when its
//! `require_*_auth` flag is set, so a deployment can run with no auth at
//! all (e.g. behind its own trusted gateway).

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use serde_json::json;

use super::AppState;

pub async fn require_management_auth(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    if !state.config.auth.require_management_auth {
        return next.run(request).await;
    }
    match check_bearer(&request, &state.config.auth.management_keys) {
        Ok(()) => next.run(request).await,
        Err(resp) => resp,
    }
}

pub async fn require_inference_auth(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    if !state.config.auth.require_inference_auth {
        return next.run(request).await;
    }
    match check_bearer(&request, &state.config.auth.inference_keys) {
        Ok(()) => next.run(request).await,
        Err(resp) => resp,
    }
}

fn check_bearer(request: &Request<Body>, allowed: &[String]) -> Result<(), Response> {
    let bearer = request.headers().typed_get::<Authorization<Bearer>>();

    match bearer {
        Some(auth) if allowed.iter().any(|k| k == auth.token()) => Ok(()),
        _ => Err(unauthorized_response()),
    }
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": true,
            "kind": "unauthorized",
            "message": "missing or invalid bearer token",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_bearer_accepts_configured_key() {
        let request = Request::builder()
            .header(axum::http::header::AUTHORIZATION, "Bearer secret-key")
            .body(Body::empty())
            .unwrap();
        assert!(check_bearer(&request, &["secret-key".to_string()]).is_ok());
    }

    #[test]
    fn check_bearer_rejects_missing_or_wrong_key() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert!(check_bearer(&request, &["secret-key".to_string()]).is_err());

        let request = Request::builder()
            .header(axum::http::header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        assert!(check_bearer(&request, &["secret-key".to_string()]).is_err());
    }

    #[test]
    fn check_bearer_ignores_non_bearer_schemes() {
        let request = Request::builder()
            .header(axum::http::header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();
        assert!(check_bearer(&request, &["secret-key".to_string()]).is_err());
    }
}
