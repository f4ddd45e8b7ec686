use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::envelope::Envelope;

/// The closed set of failure kinds every workflow operation can report.
///
/// Callers branch on the kind, never on message text: `Conflict` and
/// `Expired` mean "refresh", `Transport` means "try again", `Validation`
/// means "fix the input".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Conflict,
    Expired,
    Transport,
    NotFound,
}

impl ErrorKind {
    /// Envelope `error.code` for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Expired => "EXPIRED",
            ErrorKind::Transport => "INTERNAL_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
        }
    }

    /// Inverse of [`ErrorKind::code`]. `INTERNAL_ERROR` is deliberately not
    /// recognised so server faults fall through to the HTTP status.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "VALIDATION_ERROR" => Some(ErrorKind::Validation),
            "UNAUTHORIZED" | "FORBIDDEN" => Some(ErrorKind::Unauthorized),
            "CONFLICT" => Some(ErrorKind::Conflict),
            "EXPIRED" => Some(ErrorKind::Expired),
            "NOT_FOUND" => Some(ErrorKind::NotFound),
            _ => None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Expired => StatusCode::GONE,
            ErrorKind::Transport => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorKind::Validation,
            401 | 403 => ErrorKind::Unauthorized,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            410 => ErrorKind::Expired,
            _ => ErrorKind::Transport,
        }
    }

    /// Only transport failures are worth a manual "try again".
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transport)
    }
}

/// Tagged result error returned by every client-facing operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("request expired: {0}")]
    Expired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::Unauthorized(_) => ErrorKind::Unauthorized,
            WorkflowError::Conflict(_) => ErrorKind::Conflict,
            WorkflowError::Expired(_) => ErrorKind::Expired,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::Transport(_) => ErrorKind::Transport,
        }
    }

    pub fn from_kind(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            ErrorKind::Validation => WorkflowError::Validation(detail),
            ErrorKind::Unauthorized => WorkflowError::Unauthorized(detail),
            ErrorKind::Conflict => WorkflowError::Conflict(detail),
            ErrorKind::Expired => WorkflowError::Expired(detail),
            ErrorKind::NotFound => WorkflowError::NotFound(detail),
            ErrorKind::Transport => WorkflowError::Transport(detail),
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            WorkflowError::Validation(d)
            | WorkflowError::Unauthorized(d)
            | WorkflowError::Conflict(d)
            | WorkflowError::Expired(d)
            | WorkflowError::NotFound(d)
            | WorkflowError::Transport(d) => d,
        }
    }

    /// Message to show a person. Validation details are produced by this
    /// crate or the authority's input checks, so they are shown as-is; every
    /// other kind gets a fixed, actionable sentence.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::Validation(d) => d.clone(),
            WorkflowError::Unauthorized(_) => {
                "You are not allowed to perform this action.".to_string()
            }
            WorkflowError::Conflict(_) => {
                "This request was already handled. Refresh to see its current state.".to_string()
            }
            WorkflowError::Expired(_) => {
                "This request has expired and can no longer be decided.".to_string()
            }
            WorkflowError::NotFound(_) => "This request no longer exists.".to_string(),
            WorkflowError::Transport(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
        }
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            WorkflowError::Transport(format!("request timed out: {}", e))
        } else if e.is_decode() {
            WorkflowError::Transport(format!("schema mismatch: {}", e))
        } else {
            WorkflowError::Transport(e.to_string())
        }
    }
}

/// Server-side error for the reference authority and its REST surface.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing or invalid credential")]
    Unauthenticated,

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(detail: impl Into<String>) -> Self {
        AppError::Workflow(WorkflowError::Validation(detail.into()))
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        AppError::Workflow(WorkflowError::Unauthorized(detail.into()))
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        AppError::Workflow(WorkflowError::Conflict(detail.into()))
    }

    pub fn expired(detail: impl Into<String>) -> Self {
        AppError::Workflow(WorkflowError::Expired(detail.into()))
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        AppError::Workflow(WorkflowError::NotFound(detail.into()))
    }
}

/// In-process callers see server faults the same way HTTP callers see a 500.
impl From<AppError> for WorkflowError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Workflow(w) => w,
            AppError::Unauthenticated => {
                WorkflowError::Unauthorized("missing or invalid credential".to_string())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                WorkflowError::Transport("backend storage failure".to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                WorkflowError::Transport("backend failure".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match &self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorKind::Unauthorized.code(),
                "invalid or missing bearer token".to_string(),
            ),
            AppError::Workflow(e) => {
                let kind = e.kind();
                (kind.status(), kind.code(), e.detail().to_string())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Transport.code(),
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Transport.code(),
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(Envelope::<()>::failure(code, msg))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [ErrorKind; 6] = [
        ErrorKind::Validation,
        ErrorKind::Unauthorized,
        ErrorKind::Conflict,
        ErrorKind::Expired,
        ErrorKind::Transport,
        ErrorKind::NotFound,
    ];

    #[test]
    fn test_status_maps_back_to_same_kind() {
        for kind in ALL_KINDS {
            assert_eq!(ErrorKind::from_status(kind.status().as_u16()), kind);
        }
    }

    #[test]
    fn test_codes_round_trip_except_internal() {
        for kind in ALL_KINDS {
            let parsed = ErrorKind::from_code(kind.code());
            if kind == ErrorKind::Transport {
                assert_eq!(parsed, None);
            } else {
                assert_eq!(parsed, Some(kind));
            }
        }
    }

    #[test]
    fn test_unknown_status_is_transport() {
        assert_eq!(ErrorKind::from_status(502), ErrorKind::Transport);
        assert_eq!(ErrorKind::from_status(418), ErrorKind::Transport);
        assert_eq!(ErrorKind::from_status(401), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_only_transport_is_retryable() {
        for kind in ALL_KINDS {
            assert_eq!(kind.is_retryable(), kind == ErrorKind::Transport);
        }
    }

    #[test]
    fn test_user_messages_hide_raw_server_text() {
        let raw = "pq: could not serialize access due to concurrent update";
        for kind in [ErrorKind::Conflict, ErrorKind::Expired, ErrorKind::Transport] {
            let msg = WorkflowError::from_kind(kind, raw).user_message();
            assert!(!msg.contains("pq:"), "{:?} leaked raw text: {}", kind, msg);
        }
        let conflict = WorkflowError::Conflict(raw.into()).user_message();
        let expired = WorkflowError::Expired(raw.into()).user_message();
        let transport = WorkflowError::Transport(raw.into()).user_message();
        assert_ne!(conflict, expired);
        assert_ne!(conflict, transport);
        assert_ne!(expired, transport);
    }

    #[test]
    fn test_internal_app_error_becomes_transport() {
        let err: WorkflowError = AppError::Internal(anyhow::anyhow!("disk full")).into();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!err.detail().contains("disk full"));
    }

    #[test]
    fn test_app_error_response_status() {
        let resp = AppError::expired("too late").into_response();
        assert_eq!(resp.status(), StatusCode::GONE);

        let resp = AppError::Unauthenticated.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
