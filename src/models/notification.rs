use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;
use crate::models::validation_request::{ActionType, RequestStatus, ValidationRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ValidationRequest,
    ValidationDecision,
    General,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: Option<String>,
    pub data: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Denormalized payload of a `VALIDATION_REQUEST` notification, enough to
/// render it without fetching the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationNotice {
    pub validation_request_id: String,
    pub action_type: ActionType,
    pub resource_name: String,
    pub initiator_name: String,
}

impl ValidationNotice {
    pub fn from_request(request: &ValidationRequest) -> Self {
        Self {
            validation_request_id: request.id.clone(),
            action_type: request.action_type,
            resource_name: request.resource_name.clone(),
            initiator_name: request.initiated_by.name.clone(),
        }
    }
}

/// Payload of a `VALIDATION_DECISION` notification sent to the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNotice {
    pub validation_request_id: String,
    pub status: RequestStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl DecisionNotice {
    pub fn from_request(request: &ValidationRequest) -> Self {
        Self {
            validation_request_id: request.id.clone(),
            status: request.status,
            rejection_reason: request.rejection_reason.clone(),
        }
    }
}

impl Notification {
    /// Typed payload of a validation-request notification. `Ok(None)` for
    /// other kinds; a payload that does not match its kind is a schema
    /// mismatch.
    pub fn validation_notice(&self) -> Result<Option<ValidationNotice>, WorkflowError> {
        if self.kind != NotificationKind::ValidationRequest {
            return Ok(None);
        }
        let data = self.data.clone().ok_or_else(|| {
            WorkflowError::Transport(format!("schema mismatch: notification {} has no payload", self.id))
        })?;
        serde_json::from_value(data).map(Some).map_err(|e| {
            WorkflowError::Transport(format!("schema mismatch in notification {}: {}", self.id, e))
        })
    }

    pub fn decision_notice(&self) -> Result<Option<DecisionNotice>, WorkflowError> {
        if self.kind != NotificationKind::ValidationDecision {
            return Ok(None);
        }
        let data = self.data.clone().ok_or_else(|| {
            WorkflowError::Transport(format!("schema mismatch: notification {} has no payload", self.id))
        })?;
        serde_json::from_value(data).map(Some).map_err(|e| {
            WorkflowError::Transport(format!("schema mismatch in notification {}: {}", self.id, e))
        })
    }
}
