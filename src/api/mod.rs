use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::{AppError, ErrorKind};
use crate::models::envelope::Envelope;
use crate::AppState;

pub mod handlers;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the validation API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/validation-requests", post(handlers::create_request))
        .route("/validation-requests/pending", get(handlers::list_pending))
        .route("/validation-requests/mine", get(handlers::list_mine))
        .route("/validation-requests/:id", get(handlers::get_request))
        .route(
            "/validation-requests/:id/accept",
            post(handlers::accept_request),
        )
        .route(
            "/validation-requests/:id/reject",
            post(handlers::reject_request),
        )
        .route(
            "/validation-requests/:id/consume",
            post(handlers::consume_request),
        )
        .route(
            "/validation-requests/:id/release",
            post(handlers::release_request),
        )
        .route("/users/me", get(handlers::current_user))
        .route("/users/approvers", get(handlers::list_approvers))
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .layer(middleware::from_fn_with_state(state, bearer_auth))
        .fallback(fallback_404)
}

/// The whole HTTP surface: health probes, metrics and the API.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors(state.dashboard_origin.clone()))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

fn cors(dashboard_origin: Option<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin = origin.to_str().unwrap_or("");
            dashboard_origin.as_deref() == Some(origin)
                || origin.starts_with("http://localhost:")
                || origin.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
}

async fn fallback_404() -> Response {
    (
        ErrorKind::NotFound.status(),
        Json(Envelope::<()>::failure(ErrorKind::NotFound.code(), "no such route")),
    )
        .into_response()
}

/// Middleware: resolves `Authorization: Bearer <token>` to a [`crate::models::user::User`]
/// and stores it as a request extension. Missing or unknown tokens get a 401 envelope.
async fn bearer_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    let Some(token) = token else {
        tracing::warn!(path = %req.uri().path(), "missing bearer token");
        return Err(AppError::Unauthenticated);
    };

    let user = state.authority.authenticate(&token).await.map_err(|e| {
        // SECURITY: never log the token itself
        tracing::warn!(path = %req.uri().path(), "bearer token rejected");
        e
    })?;

    tracing::debug!(user_id = %user.id, role = %user.role, "authenticated");
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Decisions must never be served from a cache.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove(header::SERVER);

    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use crate::store::{hash_token, Store};
    use crate::workflow::testing::{fixture, user};
    use crate::models::user::Role;

    async fn app_with_token() -> (Router, String) {
        let f = fixture().await;
        f.authority
            .store()
            .upsert_user(&user("t1", "Fatou", Role::Treasurer), Some(&hash_token("tok-t1")))
            .await
            .unwrap();
        let state = Arc::new(AppState {
            authority: f.authority.clone(),
            dashboard_origin: None,
        });
        (app(state), "tok-t1".to_string())
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), MAX_BODY_BYTES).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_401_envelope() {
        let (app, _) = app_with_token().await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/validation-requests/pending")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key("x-request-id"));
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_pending_with_token_is_ok() {
        let (app, token) = app_with_token().await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/v1/validation-requests/pending")
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["cache-control"], "no-store");
        let body = body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "success": true, "data": [] }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_validation_envelope() {
        let (app, token) = app_with_token().await;
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/v1/validation-requests/x/reject")
                    .header("authorization", format!("Bearer {}", token))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"why":"no"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_health_needs_no_token() {
        let (app, _) = app_with_token().await;
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_envelope() {
        let (app, _) = app_with_token().await;
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["code"], "NOT_FOUND");
    }
}
