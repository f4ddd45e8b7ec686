use std::sync::Arc;

use super::{ValidationApi, WorkflowResult};
use crate::authority::sort_oldest_first;
use crate::errors::WorkflowError;
use crate::models::validation_request::{
    validate_rejection_reason, RequestStatus, ValidationRequest,
};

/// Approver side: the backlog and the two decisions.
///
/// Both the pending-requests screen and [`super::NotificationMirror`] go
/// through this type so the rules are applied in exactly one place.
#[derive(Clone)]
pub struct ApprovalFlow {
    api: Arc<dyn ValidationApi>,
}

impl ApprovalFlow {
    pub fn new(api: Arc<dyn ValidationApi>) -> Self {
        Self { api }
    }

    /// Requests awaiting `approver_id`, oldest first. Filtering and ordering
    /// are reapplied here whatever the backend returned.
    pub async fn list_pending(&self, approver_id: &str) -> WorkflowResult<Vec<ValidationRequest>> {
        let mut pending: Vec<ValidationRequest> = self
            .api
            .list_pending()
            .await?
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending && r.assigned_approver == approver_id)
            .collect();
        sort_oldest_first(&mut pending);
        Ok(pending)
    }

    /// The authority's current copy of one request.
    pub async fn request(&self, request_id: &str) -> WorkflowResult<ValidationRequest> {
        self.api.get_request(request_id).await
    }

    pub async fn accept(&self, request_id: &str) -> WorkflowResult<ValidationRequest> {
        let decided = self.api.accept(request_id).await?;
        expect_status(&decided, request_id, RequestStatus::Accepted)?;
        tracing::info!(request_id, "validation request accepted");
        Ok(decided)
    }

    pub async fn reject(
        &self,
        request_id: &str,
        rejection_reason: &str,
    ) -> WorkflowResult<ValidationRequest> {
        validate_rejection_reason(rejection_reason)?;
        let decided = self.api.reject(request_id, rejection_reason).await?;
        expect_status(&decided, request_id, RequestStatus::Rejected)?;
        tracing::info!(request_id, "validation request rejected");
        Ok(decided)
    }
}

fn expect_status(
    decided: &ValidationRequest,
    request_id: &str,
    expected: RequestStatus,
) -> WorkflowResult<()> {
    if decided.id != request_id || decided.status != expected {
        return Err(WorkflowError::Transport(format!(
            "schema mismatch: decision on {} returned {} in state {}",
            request_id, decided.id, decided.status
        )));
    }
    decided
        .check_invariants()
        .map_err(|e| WorkflowError::Transport(format!("schema mismatch: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::workflow::testing::{draft, fixture};
    use crate::workflow::ValidationApi;
    use chrono::Duration;

    #[tokio::test]
    async fn test_list_pending_oldest_first() {
        let f = fixture().await;
        let first = f.admin.create_request(&draft("t1")).await.unwrap();
        f.clock.advance(Duration::minutes(5));
        let second = f.admin.create_request(&draft("t1")).await.unwrap();
        f.admin.create_request(&draft("t2")).await.unwrap();

        let flow = ApprovalFlow::new(Arc::new(f.treasurer.clone()));
        let ids: Vec<String> = flow
            .list_pending("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_same_timestamp_ties_break_on_id() {
        let f = fixture().await;
        let a = f.admin.create_request(&draft("t1")).await.unwrap();
        let b = f.admin.create_request(&draft("t1")).await.unwrap();

        let flow = ApprovalFlow::new(Arc::new(f.treasurer.clone()));
        let pending = flow.list_pending("t1").await.unwrap();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(pending.into_iter().map(|r| r.id).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_accept_then_reject_conflicts() {
        let f = fixture().await;
        let req = f.admin.create_request(&draft("t1")).await.unwrap();
        let flow = ApprovalFlow::new(Arc::new(f.treasurer.clone()));

        let accepted = flow.accept(&req.id).await.unwrap();
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert!(accepted.decided_at.is_some());

        let err = flow.reject(&req.id, "Changed my mind about it").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_short_rejection_reason_is_local_validation() {
        let f = fixture().await;
        let req = f.admin.create_request(&draft("t1")).await.unwrap();
        let flow = ApprovalFlow::new(Arc::new(f.treasurer.clone()));

        let err = flow.reject(&req.id, "   no      ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            f.admin.get_request(&req.id).await.unwrap().status,
            RequestStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_wrong_approver_is_unauthorized() {
        let f = fixture().await;
        let req = f.admin.create_request(&draft("t1")).await.unwrap();
        let flow = ApprovalFlow::new(Arc::new(f.other_treasurer.clone()));

        assert_eq!(flow.accept(&req.id).await.unwrap_err().kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_overdue_request_is_expired() {
        let f = fixture().await;
        let req = f.admin.create_request(&draft("t1")).await.unwrap();
        f.clock.advance(Duration::hours(73));
        let flow = ApprovalFlow::new(Arc::new(f.treasurer.clone()));

        assert_eq!(flow.accept(&req.id).await.unwrap_err().kind(), ErrorKind::Expired);
        assert!(flow.list_pending("t1").await.unwrap().is_empty());
    }
}
