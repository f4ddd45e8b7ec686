use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::envelope::Envelope;
use crate::models::notification::Notification;
use crate::models::user::User;
use crate::models::validation_request::{
    NewValidationRequest, RejectBody, RequestStatus, ValidationRequest,
};
use crate::AppState;

type ApiResult<T> = Result<Json<Envelope<T>>, AppError>;

// ── Query parameters ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MineParams {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationParams {
    pub unread_only: Option<bool>,
}

/// Malformed bodies get the same envelope as every other failure.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| AppError::validation(e.body_text()))
}

// ── Validation requests ──────────────────────────────────────

/// POST /api/v1/validation-requests
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    payload: Result<Json<NewValidationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<ValidationRequest>>), AppError> {
    let draft = body(payload)?;
    let created = state.authority.create_request(&caller, &draft).await?;
    Ok((StatusCode::CREATED, Json(Envelope::ok(created))))
}

/// GET /api/v1/validation-requests/pending
pub async fn list_pending(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
) -> ApiResult<Vec<ValidationRequest>> {
    let pending = state.authority.list_pending(&caller).await?;
    Ok(Json(Envelope::ok(pending)))
}

/// GET /api/v1/validation-requests/mine?status=
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    Query(params): Query<MineParams>,
) -> ApiResult<Vec<ValidationRequest>> {
    let status = match params.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<RequestStatus>().map_err(AppError::validation)?),
    };
    let mine = state.authority.list_mine(&caller, status).await?;
    Ok(Json(Envelope::ok(mine)))
}

/// GET /api/v1/validation-requests/:id
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    Path(id): Path<String>,
) -> ApiResult<ValidationRequest> {
    let request = state.authority.get_request(&caller, &id).await?;
    Ok(Json(Envelope::ok(request)))
}

/// POST /api/v1/validation-requests/:id/accept
pub async fn accept_request(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    Path(id): Path<String>,
) -> ApiResult<ValidationRequest> {
    let decided = state.authority.accept(&caller, &id).await?;
    Ok(Json(Envelope::ok(decided)))
}

/// POST /api/v1/validation-requests/:id/consume
pub async fn consume_request(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    Path(id): Path<String>,
) -> ApiResult<ValidationRequest> {
    Ok(Json(Envelope::ok(state.authority.consume(&caller, &id).await?)))
}

/// POST /api/v1/validation-requests/:id/release
pub async fn release_request(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    Path(id): Path<String>,
) -> ApiResult<ValidationRequest> {
    Ok(Json(Envelope::ok(state.authority.release(&caller, &id).await?)))
}

/// POST /api/v1/validation-requests/:id/reject
pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    Path(id): Path<String>,
    payload: Result<Json<RejectBody>, JsonRejection>,
) -> ApiResult<ValidationRequest> {
    let RejectBody { reason } = body(payload)?;
    let decided = state.authority.reject(&caller, &id, &reason).await?;
    Ok(Json(Envelope::ok(decided)))
}

// ── Users ────────────────────────────────────────────────────

/// GET /api/v1/users/me
pub async fn current_user(Extension(caller): Extension<User>) -> ApiResult<User> {
    Ok(Json(Envelope::ok(caller)))
}

/// GET /api/v1/users/approvers
pub async fn list_approvers(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
) -> ApiResult<Vec<User>> {
    let approvers = state.authority.list_eligible_approvers(&caller).await?;
    Ok(Json(Envelope::ok(approvers)))
}

// ── Notifications ────────────────────────────────────────────

/// GET /api/v1/notifications?unreadOnly=
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    Query(params): Query<NotificationParams>,
) -> ApiResult<Vec<Notification>> {
    let items = state
        .authority
        .list_notifications(&caller, params.unread_only.unwrap_or(false))
        .await?;
    Ok(Json(Envelope::ok(items)))
}

/// POST /api/v1/notifications/:id/read
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<User>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.authority.mark_notification_read(&caller, &id).await?;
    Ok(Json(Envelope::ok(())))
}

// ── Operational ──────────────────────────────────────────────

/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.authority.metrics().encode(),
    )
}

/// GET /readyz
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, AppError> {
    state.authority.store().list_users().await?;
    Ok("ok")
}
