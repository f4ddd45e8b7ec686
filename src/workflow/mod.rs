//! Client-side validation workflow.
//!
//! Everything here holds read copies only. State changes are proposed to an
//! authority through [`ValidationApi`] and the returned record is the only
//! truth the client keeps.

use async_trait::async_trait;

use crate::errors::WorkflowError;
use crate::models::notification::Notification;
use crate::models::user::User;
use crate::models::validation_request::{NewValidationRequest, RequestStatus, ValidationRequest};

pub mod approval;
pub mod creation;
pub mod gate;
pub mod mirror;
pub mod tracking;

pub use approval::ApprovalFlow;
pub use creation::RequestCreation;
pub use gate::ExecutionGate;
pub use mirror::{MirrorOutcome, NotificationMirror, PendingNotice};
pub use tracking::DecisionTracker;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Operations the authority exposes to an authenticated caller.
#[async_trait]
pub trait ValidationApi: Send + Sync {
    /// The user the authority identifies the caller as.
    async fn current_user(&self) -> WorkflowResult<User>;

    async fn create_request(&self, draft: &NewValidationRequest) -> WorkflowResult<ValidationRequest>;

    /// Pending requests assigned to the caller.
    async fn list_pending(&self) -> WorkflowResult<Vec<ValidationRequest>>;

    /// Requests initiated by the caller.
    async fn list_mine(&self, status: Option<RequestStatus>) -> WorkflowResult<Vec<ValidationRequest>>;

    async fn get_request(&self, id: &str) -> WorkflowResult<ValidationRequest>;

    async fn accept(&self, id: &str) -> WorkflowResult<ValidationRequest>;

    async fn reject(&self, id: &str, reason: &str) -> WorkflowResult<ValidationRequest>;

    async fn list_eligible_approvers(&self) -> WorkflowResult<Vec<User>>;

    /// Claim the authorization of an accepted request for execution. The
    /// authority grants this once per request; a second claim is a conflict.
    async fn consume(&self, id: &str) -> WorkflowResult<ValidationRequest>;

    /// Hand a claimed authorization back after the action failed.
    async fn release(&self, id: &str) -> WorkflowResult<ValidationRequest>;
}

#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn list_notifications(&self, unread_only: bool) -> WorkflowResult<Vec<Notification>>;

    async fn mark_notification_read(&self, id: &str) -> WorkflowResult<()>;
}

/// Performs the sensitive action an accepted request authorizes.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: &ValidationRequest) -> WorkflowResult<()>;
}

#[cfg(test)]
pub(crate) mod testing;
