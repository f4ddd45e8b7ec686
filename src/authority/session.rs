use std::sync::Arc;

use async_trait::async_trait;

use super::Authority;
use crate::models::notification::Notification;
use crate::models::user::User;
use crate::models::validation_request::{NewValidationRequest, RequestStatus, ValidationRequest};
use crate::workflow::{NotificationApi, ValidationApi, WorkflowResult};

/// An authenticated caller bound to an in-process [`Authority`].
///
/// Lets the workflow components run without HTTP; server faults surface as
/// `Transport` exactly as a 500 would.
#[derive(Clone)]
pub struct Session {
    authority: Arc<Authority>,
    caller: User,
}

impl Session {
    pub fn new(authority: Arc<Authority>, caller: User) -> Self {
        Self { authority, caller }
    }

    pub fn caller(&self) -> &User {
        &self.caller
    }
}

#[async_trait]
impl ValidationApi for Session {
    async fn current_user(&self) -> WorkflowResult<User> {
        Ok(self.caller.clone())
    }

    async fn create_request(&self, draft: &NewValidationRequest) -> WorkflowResult<ValidationRequest> {
        Ok(self.authority.create_request(&self.caller, draft).await?)
    }

    async fn list_pending(&self) -> WorkflowResult<Vec<ValidationRequest>> {
        Ok(self.authority.list_pending(&self.caller).await?)
    }

    async fn list_mine(&self, status: Option<RequestStatus>) -> WorkflowResult<Vec<ValidationRequest>> {
        Ok(self.authority.list_mine(&self.caller, status).await?)
    }

    async fn get_request(&self, id: &str) -> WorkflowResult<ValidationRequest> {
        Ok(self.authority.get_request(&self.caller, id).await?)
    }

    async fn accept(&self, id: &str) -> WorkflowResult<ValidationRequest> {
        Ok(self.authority.accept(&self.caller, id).await?)
    }

    async fn reject(&self, id: &str, reason: &str) -> WorkflowResult<ValidationRequest> {
        Ok(self.authority.reject(&self.caller, id, reason).await?)
    }

    async fn list_eligible_approvers(&self) -> WorkflowResult<Vec<User>> {
        Ok(self.authority.list_eligible_approvers(&self.caller).await?)
    }

    async fn consume(&self, id: &str) -> WorkflowResult<ValidationRequest> {
        Ok(self.authority.consume(&self.caller, id).await?)
    }

    async fn release(&self, id: &str) -> WorkflowResult<ValidationRequest> {
        Ok(self.authority.release(&self.caller, id).await?)
    }
}

#[async_trait]
impl NotificationApi for Session {
    async fn list_notifications(&self, unread_only: bool) -> WorkflowResult<Vec<Notification>> {
        Ok(self.authority.list_notifications(&self.caller, unread_only).await?)
    }

    async fn mark_notification_read(&self, id: &str) -> WorkflowResult<()> {
        Ok(self.authority.mark_notification_read(&self.caller, id).await?)
    }
}
