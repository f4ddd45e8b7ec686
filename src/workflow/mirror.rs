use std::sync::Arc;

use super::{ApprovalFlow, NotificationApi, WorkflowResult};
use crate::errors::{ErrorKind, WorkflowError};
use crate::models::notification::{Notification, ValidationNotice};
use crate::models::validation_request::ValidationRequest;

/// An unread validation-request notification and its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNotice {
    pub notification: Notification,
    pub notice: ValidationNotice,
}

/// Result of a decision taken from the notification feed.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorOutcome {
    pub request: ValidationRequest,
    /// `false` when the decision went through but the notification could
    /// not be marked read.
    pub marked_read: bool,
}

/// Approve or reject straight from the notification feed.
pub struct NotificationMirror {
    notifications: Arc<dyn NotificationApi>,
    approval: ApprovalFlow,
}

impl NotificationMirror {
    pub fn new(notifications: Arc<dyn NotificationApi>, approval: ApprovalFlow) -> Self {
        Self {
            notifications,
            approval,
        }
    }

    /// Unread validation requests whose request is still pending, so this
    /// feed never offers more than the pending-requests screen does.
    /// Notices of requests that were settled elsewhere are marked read.
    pub async fn pending_notices(&self) -> WorkflowResult<Vec<PendingNotice>> {
        let mut out = Vec::new();
        for notification in self.notifications.list_notifications(true).await? {
            let Some(notice) = notification.validation_notice()? else {
                continue;
            };
            match self.approval.request(&notice.validation_request_id).await {
                Ok(request) if request.is_pending() => out.push(PendingNotice {
                    notification,
                    notice,
                }),
                Ok(request) => {
                    tracing::debug!(
                        notification_id = %notification.id,
                        request_id = %request.id,
                        status = %request.status,
                        "retiring notice of a settled request"
                    );
                    self.retire(&notification).await;
                }
                Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::Unauthorized) => {
                    tracing::debug!(
                        notification_id = %notification.id,
                        error = %e,
                        "skipping notice of an unreachable request"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    async fn retire(&self, notification: &Notification) {
        if let Err(e) = self
            .notifications
            .mark_notification_read(&notification.id)
            .await
        {
            tracing::warn!(notification_id = %notification.id, error = %e, "could not retire notice");
        }
    }

    pub async fn accept(&self, notification: &Notification) -> WorkflowResult<MirrorOutcome> {
        let notice = Self::notice_of(notification)?;
        let request = self.approval.accept(&notice.validation_request_id).await?;
        Ok(self.settle(notification, request).await)
    }

    pub async fn reject(
        &self,
        notification: &Notification,
        rejection_reason: &str,
    ) -> WorkflowResult<MirrorOutcome> {
        let notice = Self::notice_of(notification)?;
        let request = self
            .approval
            .reject(&notice.validation_request_id, rejection_reason)
            .await?;
        Ok(self.settle(notification, request).await)
    }

    fn notice_of(notification: &Notification) -> WorkflowResult<ValidationNotice> {
        notification.validation_notice()?.ok_or_else(|| {
            WorkflowError::Validation(format!(
                "notification {} is not a validation request",
                notification.id
            ))
        })
    }

    async fn settle(&self, notification: &Notification, request: ValidationRequest) -> MirrorOutcome {
        let marked_read = match self
            .notifications
            .mark_notification_read(&notification.id)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification.id,
                    request_id = %request.id,
                    error = %e,
                    "decision recorded but notification could not be marked read"
                );
                false
            }
        };
        MirrorOutcome {
            request,
            marked_read,
        }
    }
}
