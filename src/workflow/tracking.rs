use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{ValidationApi, WorkflowResult};
use crate::errors::WorkflowError;
use crate::models::validation_request::ValidationRequest;

/// Initiator side: waits for an approver to decide.
pub struct DecisionTracker {
    api: Arc<dyn ValidationApi>,
    interval: Duration,
    timeout: Duration,
}

impl DecisionTracker {
    pub fn new(api: Arc<dyn ValidationApi>, interval: Duration, timeout: Duration) -> Self {
        Self {
            api,
            interval,
            timeout,
        }
    }

    /// Poll until the request leaves `pending` or the timeout passes, and
    /// return the latest authoritative copy (still pending on timeout).
    ///
    /// Transport failures are retried on the next tick; any other error ends
    /// the wait.
    pub async fn wait_for_decision(&self, request_id: &str) -> WorkflowResult<ValidationRequest> {
        let deadline = Instant::now() + self.timeout;
        let mut latest: Option<ValidationRequest> = None;
        let mut last_error: Option<WorkflowError> = None;

        loop {
            match self.api.get_request(request_id).await {
                Ok(request) if !request.is_pending() => {
                    tracing::info!(request_id, status = %request.status, "decision observed");
                    return Ok(request);
                }
                Ok(request) => latest = Some(request),
                Err(e) if e.kind().is_retryable() => {
                    tracing::warn!(request_id, error = %e, "poll failed, will retry");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() + self.interval > deadline {
                break;
            }
            tokio::time::sleep(self.interval).await;
        }

        tracing::debug!(request_id, "stopped waiting for a decision");
        match (latest, last_error) {
            (Some(request), _) => Ok(request),
            (None, Some(e)) => Err(e),
            (None, None) => Err(WorkflowError::Transport(format!(
                "no response for request {}",
                request_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::models::validation_request::RequestStatus;
    use crate::workflow::testing::{draft, fixture};

    #[tokio::test]
    async fn test_returns_once_decided() {
        let f = fixture().await;
        let req = f.admin.create_request(&draft("t1")).await.unwrap();
        let tracker = DecisionTracker::new(
            Arc::new(f.admin.clone()),
            Duration::from_millis(10),
            Duration::from_secs(5),
        );

        let treasurer = f.treasurer.clone();
        let id = req.id.clone();
        let decide = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            treasurer.accept(&id).await.unwrap();
        });

        let seen = tracker.wait_for_decision(&req.id).await.unwrap();
        decide.await.unwrap();
        assert_eq!(seen.status, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn test_timeout_returns_pending_copy() {
        let f = fixture().await;
        let req = f.admin.create_request(&draft("t1")).await.unwrap();
        let tracker = DecisionTracker::new(
            Arc::new(f.admin.clone()),
            Duration::from_millis(5),
            Duration::from_millis(20),
        );

        let seen = tracker.wait_for_decision(&req.id).await.unwrap();
        assert_eq!(seen.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_not_found_ends_wait() {
        let f = fixture().await;
        let tracker = DecisionTracker::new(
            Arc::new(f.admin.clone()),
            Duration::from_millis(5),
            Duration::from_secs(5),
        );

        let err = tracker.wait_for_decision("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
