use std::sync::Arc;

use super::{ValidationApi, WorkflowResult};
use crate::errors::WorkflowError;
use crate::models::user::User;
use crate::models::validation_request::{NewValidationRequest, RequestStatus, ValidationRequest};

/// Initiator side: turns a draft into a pending request.
pub struct RequestCreation {
    api: Arc<dyn ValidationApi>,
    min_reason_len: usize,
}

impl RequestCreation {
    pub fn new(api: Arc<dyn ValidationApi>) -> Self {
        Self {
            api,
            min_reason_len: 0,
        }
    }

    /// Require at least `len` trimmed characters of justification before
    /// anything is sent. `0` only keeps the non-empty rule.
    pub fn with_min_reason_len(mut self, len: usize) -> Self {
        self.min_reason_len = len;
        self
    }

    pub async fn eligible_approvers(&self) -> WorkflowResult<Vec<User>> {
        self.api.list_eligible_approvers().await
    }

    pub async fn create(&self, draft: &NewValidationRequest) -> WorkflowResult<ValidationRequest> {
        draft.validate()?;
        let reason_len = draft.reason.trim().chars().count();
        if reason_len < self.min_reason_len {
            return Err(WorkflowError::Validation(format!(
                "please explain the request in at least {} characters",
                self.min_reason_len
            )));
        }

        let approvers = self.eligible_approvers().await?;
        if approvers.is_empty() {
            return Err(WorkflowError::Validation(
                "no eligible approver is available for this request".into(),
            ));
        }
        let approver_id = draft.assigned_approver.trim();
        if !approvers.iter().any(|u| u.id == approver_id) {
            return Err(WorkflowError::Validation(format!(
                "{} is not an eligible approver",
                approver_id
            )));
        }

        let created = self.api.create_request(draft).await?;
        if created.status != RequestStatus::Pending
            || created.action_type != draft.action_type
            || created.assigned_approver != approver_id
        {
            return Err(WorkflowError::Transport(format!(
                "schema mismatch: created request {} does not match the submitted draft",
                created.id
            )));
        }

        tracing::info!(
            request_id = %created.id,
            action_type = %created.action_type,
            approver = %created.assigned_approver,
            "validation request submitted"
        );
        Ok(created)
    }
}
