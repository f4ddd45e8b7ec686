//! Background job: materialize `expired` for overdue validation requests.
//!
//! Expiry is already enforced lazily on every read and decision; the sweep
//! only keeps stored state and webhook consumers in step with the clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::authority::Authority;

/// Spawn the sweep task. Call this once at startup.
pub fn spawn(authority: Arc<Authority>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweep(&authority).await;
        }
    })
}

/// One pass. Errors are logged and the next tick tries again.
pub async fn sweep(authority: &Authority) -> usize {
    match authority.expire_overdue().await {
        Ok(0) => 0,
        Ok(n) => {
            tracing::info!(expired = n, "expired overdue validation requests");
            n
        }
        Err(e) => {
            tracing::error!("expiry sweep failed: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::validation_request::RequestStatus;
    use crate::store::Store;
    use crate::workflow::testing::{draft, fixture};
    use crate::middleware::metrics::DecisionOutcome;
    use crate::models::notification::{DecisionNotice, NotificationKind};
    use crate::workflow::{NotificationApi, ValidationApi};

    #[tokio::test]
    async fn test_sweep_expires_only_overdue() {
        let f = fixture().await;
        let old = f.admin.create_request(&draft("t1")).await.unwrap();
        f.clock.advance(chrono::Duration::hours(50));
        let fresh = f.admin.create_request(&draft("t1")).await.unwrap();
        f.clock.advance(chrono::Duration::hours(30));

        assert_eq!(sweep(&f.authority).await, 1);
        assert_eq!(sweep(&f.authority).await, 0);

        let store = f.authority.store();
        assert_eq!(
            store.get_request(&old.id).await.unwrap().unwrap().status,
            RequestStatus::Expired
        );
        assert_eq!(
            store.get_request(&fresh.id).await.unwrap().unwrap().status,
            RequestStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_sweep_settles_notifications_and_metrics() {
        let f = fixture().await;
        let req = f.admin.create_request(&draft("t1")).await.unwrap();
        assert_eq!(f.treasurer.list_notifications(true).await.unwrap().len(), 1);
        f.clock.advance(chrono::Duration::hours(73));

        assert_eq!(sweep(&f.authority).await, 1);

        assert!(f.treasurer.list_notifications(true).await.unwrap().is_empty());
        let told = f.admin.list_notifications(true).await.unwrap();
        assert_eq!(told.len(), 1);
        assert_eq!(told[0].kind, NotificationKind::ValidationDecision);
        let notice: DecisionNotice =
            serde_json::from_value(told[0].data.clone().unwrap()).unwrap();
        assert_eq!(notice.validation_request_id, req.id);
        assert_eq!(notice.status, RequestStatus::Expired);
        assert_eq!(f.authority.metrics().decisions(DecisionOutcome::Expired), 1);
    }
}
