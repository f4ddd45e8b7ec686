use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::Store;
use crate::models::notification::{Notification, NotificationKind};
use crate::models::user::User;
use crate::models::validation_request::{RequestStatus, Transition, ValidationRequest};

/// In-process store. All mutation happens under one write lock, which is
/// what makes [`Store::transition`] a compare-and-set.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, User>,
    // token hash -> user id
    tokens: HashMap<String, String>,
    requests: HashMap<String, ValidationRequest>,
    notifications: Vec<Notification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        Ok(self.inner.read().await.users.get(id).cloned())
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> anyhow::Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tokens
            .get(token_hash)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let mut users: Vec<User> = self.inner.read().await.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn upsert_user(&self, user: &User, token_hash: Option<&str>) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(hash) = token_hash {
            inner.tokens.retain(|_, id| id != &user.id);
            inner.tokens.insert(hash.to_string(), user.id.clone());
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn insert_request(&self, request: &ValidationRequest) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if inner.requests.contains_key(&request.id) {
            anyhow::bail!("duplicate validation request id {}", request.id);
        }
        inner.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn get_request(&self, id: &str) -> anyhow::Result<Option<ValidationRequest>> {
        Ok(self.inner.read().await.requests.get(id).cloned())
    }

    async fn list_pending_for(&self, approver_id: &str) -> anyhow::Result<Vec<ValidationRequest>> {
        Ok(self
            .inner
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.is_pending() && r.assigned_approver == approver_id)
            .cloned()
            .collect())
    }

    async fn list_initiated_by(
        &self,
        initiator_id: &str,
        status: Option<RequestStatus>,
    ) -> anyhow::Result<Vec<ValidationRequest>> {
        Ok(self
            .inner
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.initiated_by.id == initiator_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn transition(&self, id: &str, transition: &Transition) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.requests.get_mut(id) {
            Some(request) if request.is_pending() => {
                transition.apply_to(request);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ValidationRequest>> {
        let mut inner = self.inner.write().await;
        let expire = Transition::expire();
        let mut changed = Vec::new();
        for request in inner.requests.values_mut() {
            if request.is_overdue(now) {
                expire.apply_to(request);
                changed.push(request.clone());
            }
        }
        Ok(changed)
    }

    async fn consume(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.requests.get_mut(id) {
            Some(request)
                if request.status == RequestStatus::Accepted && request.consumed_at.is_none() =>
            {
                request.consumed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .requests
            .get_mut(id)
            .and_then(|request| request.consumed_at.take())
            .is_some())
    }

    async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.inner
            .write()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<Notification>> {
        let inner = self.inner.read().await;
        // Stored in insertion order; newest first means walking backwards.
        Ok(inner
            .notifications
            .iter()
            .rev()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| !unread_only || !n.is_read)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(&self, id: &str, recipient_id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        match inner
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.recipient_id == recipient_id)
        {
            Some(n) => {
                n.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_request_notices_read(
        &self,
        request_id: &str,
        recipient_id: &str,
    ) -> anyhow::Result<u64> {
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for n in inner.notifications.iter_mut().filter(|n| {
            !n.is_read
                && n.recipient_id == recipient_id
                && n.kind == NotificationKind::ValidationRequest
                && n.data
                    .as_ref()
                    .and_then(|d| d.get("validationRequestId"))
                    .and_then(|v| v.as_str())
                    == Some(request_id)
        }) {
            n.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::validation_request::{ActionType, ResourceType, UserRef};
    use chrono::Duration;

    fn request(id: &str) -> ValidationRequest {
        let now = Utc::now();
        ValidationRequest {
            id: id.into(),
            action_type: ActionType::BlockTontine,
            resource_type: ResourceType::Tontine,
            resource_id: "tn1".into(),
            resource_name: "Tontine des commerçantes".into(),
            reason: "Unpaid cotisations".into(),
            initiated_by: UserRef { id: "a1".into(), name: "Awa".into() },
            assigned_approver: "t1".into(),
            status: RequestStatus::Pending,
            rejection_reason: None,
            created_at: now,
            expires_at: now + Duration::hours(1),
            decided_at: None,
            consumed_at: None,
        }
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryStore::new();
        store.insert_request(&request("r1")).await.unwrap();

        assert!(store.transition("r1", &Transition::accept(Utc::now())).await.unwrap());
        assert!(!store
            .transition("r1", &Transition::reject("changed my mind", Utc::now()))
            .await
            .unwrap());
        assert!(!store.transition("missing", &Transition::expire()).await.unwrap());

        let stored = store.get_request("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert!(stored.rejection_reason.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let store = MemoryStore::new();
        store.insert_request(&request("r1")).await.unwrap();
        assert!(store.insert_request(&request("r1")).await.is_err());
    }

    #[tokio::test]
    async fn test_expire_overdue_only_touches_pending() {
        let store = MemoryStore::new();
        store.insert_request(&request("r1")).await.unwrap();
        store.insert_request(&request("r2")).await.unwrap();
        store.transition("r2", &Transition::accept(Utc::now())).await.unwrap();

        let later = Utc::now() + Duration::hours(2);
        let changed = store.expire_overdue(later).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, "r1");
        assert_eq!(changed[0].status, RequestStatus::Expired);
        assert_eq!(changed[0].resource_name, "Tontine des commerçantes");
        assert_eq!(
            store.get_request("r2").await.unwrap().unwrap().status,
            RequestStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_consume_needs_accepted_and_happens_once() {
        let store = MemoryStore::new();
        store.insert_request(&request("r1")).await.unwrap();
        assert!(!store.consume("r1", Utc::now()).await.unwrap());

        store.transition("r1", &Transition::accept(Utc::now())).await.unwrap();
        assert!(store.consume("r1", Utc::now()).await.unwrap());
        assert!(!store.consume("r1", Utc::now()).await.unwrap());

        assert!(store.release("r1").await.unwrap());
        assert!(!store.release("r1").await.unwrap());
        assert!(store.consume("r1", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_request_notices_marked_read_by_request_id() {
        let store = MemoryStore::new();
        let notice = |id: &str, request_id: &str, recipient: &str| Notification {
            id: id.into(),
            recipient_id: recipient.into(),
            kind: NotificationKind::ValidationRequest,
            title: "Validation requested".into(),
            body: None,
            data: Some(serde_json::json!({ "validationRequestId": request_id })),
            is_read: false,
            created_at: Utc::now(),
        };
        store.insert_notification(&notice("n1", "r1", "t1")).await.unwrap();
        store.insert_notification(&notice("n2", "r2", "t1")).await.unwrap();
        store.insert_notification(&notice("n3", "r1", "t2")).await.unwrap();

        assert_eq!(store.mark_request_notices_read("r1", "t1").await.unwrap(), 1);
        let unread: Vec<String> = store
            .list_notifications("t1", true, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(unread, vec!["n2".to_string()]);
        assert_eq!(store.list_notifications("t2", true, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_token_rotation_replaces_old_hash() {
        let store = MemoryStore::new();
        let user = User {
            id: "t1".into(),
            name: "Fatou".into(),
            role: crate::models::user::Role::Treasurer,
            is_active: true,
        };
        store.upsert_user(&user, Some("old")).await.unwrap();
        store.upsert_user(&user, Some("new")).await.unwrap();
        assert!(store.find_user_by_token_hash("old").await.unwrap().is_none());
        assert_eq!(store.find_user_by_token_hash("new").await.unwrap(), Some(user));
    }
}
