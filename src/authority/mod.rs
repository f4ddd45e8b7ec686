//! Reference authority for the validation workflow.
//!
//! This is the server side of the protocol: it owns the canonical
//! `ValidationRequest` records and is the only component that ever changes
//! their status. Clients (the [`crate::workflow`] components, through either
//! [`Session`] or [`crate::client::ApiClient`]) only propose transitions.
//!
//! Decision checks run in a fixed order:
//!
//! 1. input (rejection reason length)
//! 2. existence → `NotFound`
//! 3. caller is the assigned approver → `Unauthorized`
//! 4. stored status: `expired` → `Expired`, decided → `Conflict`
//! 5. deadline passed → stored as `expired`, `Expired`
//! 6. compare-and-set; on a lost race the record is re-read
//!
//! Once a request leaves `pending`, by decision or by expiry, the approver's
//! `VALIDATION_REQUEST` notice for it is marked read so the notification
//! feed never offers it again.
//!
//! An accepted request authorizes its action once: [`Authority::consume`]
//! claims that authorization with a compare-and-set on `consumed_at`.

use std::sync::Arc;

use chrono::Duration;

use crate::errors::AppError;
use crate::middleware::metrics::{DecisionOutcome, WorkflowMetrics};
use crate::middleware::rbac::{enforce, Permission};
use crate::models::notification::{DecisionNotice, Notification, NotificationKind, ValidationNotice};
use crate::models::user::{Role, User};
use crate::models::validation_request::{
    validate_rejection_reason, NewValidationRequest, RequestStatus, Transition, UserRef,
    ValidationRequest,
};
use crate::notification::webhook::{ValidationEvent, WebhookNotifier};
use crate::store::{hash_token, Store};

pub mod clock;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use session::Session;

/// Tunables of the authority.
#[derive(Debug, Clone)]
pub struct AuthoritySettings {
    /// Lifetime of a pending request.
    pub request_ttl: Duration,
    /// Page size of the notification feed.
    pub notification_limit: usize,
}

impl Default for AuthoritySettings {
    fn default() -> Self {
        Self {
            request_ttl: Duration::hours(72),
            notification_limit: 50,
        }
    }
}

pub struct Authority {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: AuthoritySettings,
    webhook: WebhookNotifier,
    metrics: WorkflowMetrics,
}

impl Authority {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        settings: AuthoritySettings,
        webhook: WebhookNotifier,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            clock,
            settings,
            webhook,
            metrics: WorkflowMetrics::new()?,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn metrics(&self) -> &WorkflowMetrics {
        &self.metrics
    }

    // -- Authentication --

    /// Resolve a bearer token to an active user.
    pub async fn authenticate(&self, token: &str) -> Result<User, AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Unauthenticated);
        }
        match self.store.find_user_by_token_hash(&hash_token(token)).await? {
            Some(user) if user.is_active => Ok(user),
            Some(user) => {
                tracing::warn!(user_id = %user.id, "rejected token of inactive user");
                Err(AppError::Unauthenticated)
            }
            None => Err(AppError::Unauthenticated),
        }
    }

    /// Bind a caller to this authority for in-process use.
    pub fn session(self: &Arc<Self>, caller: User) -> Session {
        Session::new(self.clone(), caller)
    }

    // -- Creation --

    pub async fn create_request(
        &self,
        caller: &User,
        draft: &NewValidationRequest,
    ) -> Result<ValidationRequest, AppError> {
        enforce(caller, Permission::InitiateValidation)?;
        draft.validate()?;

        let approver = self
            .store
            .find_user(draft.assigned_approver.trim())
            .await?
            .ok_or_else(|| AppError::validation("the selected approver does not exist"))?;
        if !approver.is_eligible_approver() {
            return Err(AppError::validation(format!(
                "{} is not an active treasurer and cannot approve requests",
                approver.name
            )));
        }
        if approver.id == caller.id {
            return Err(AppError::validation("you cannot approve your own request"));
        }

        let now = self.clock.now();
        let request = ValidationRequest {
            id: uuid::Uuid::new_v4().to_string(),
            action_type: draft.action_type,
            resource_type: draft.resource_type,
            resource_id: draft.resource_id.trim().to_string(),
            resource_name: draft.resource_name.trim().to_string(),
            reason: draft.reason.clone(),
            initiated_by: UserRef {
                id: caller.id.clone(),
                name: caller.name.clone(),
            },
            assigned_approver: approver.id.clone(),
            status: RequestStatus::Pending,
            rejection_reason: None,
            created_at: now,
            expires_at: now + self.settings.request_ttl,
            decided_at: None,
            consumed_at: None,
        };

        self.store.insert_request(&request).await?;
        tracing::info!(
            request_id = %request.id,
            action_type = %request.action_type,
            initiator = %caller.id,
            approver = %approver.id,
            "validation request created"
        );
        self.metrics.record_created(request.action_type);

        self.notify(Notification {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: approver.id.clone(),
            kind: NotificationKind::ValidationRequest,
            title: format!("Validation requested: {}", request.action_type.label()),
            body: Some(format!(
                "{} asks you to approve \"{}\" on {}",
                caller.name,
                request.action_type.label(),
                request.resource_name
            )),
            data: serde_json::to_value(ValidationNotice::from_request(&request)).ok(),
            is_read: false,
            created_at: now,
        })
        .await;
        self.webhook.dispatch(ValidationEvent::requested(&request));

        Ok(request)
    }

    // -- Reads --

    /// Pending requests assigned to the caller, oldest first, ties by id.
    pub async fn list_pending(&self, caller: &User) -> Result<Vec<ValidationRequest>, AppError> {
        enforce(caller, Permission::DecideValidation)?;
        let now = self.clock.now();

        let mut pending = Vec::new();
        for request in self.store.list_pending_for(&caller.id).await? {
            if request.is_overdue(now) {
                self.expire(&request).await?;
                continue;
            }
            pending.push(request);
        }
        sort_oldest_first(&mut pending);
        Ok(pending)
    }

    /// Requests the caller initiated, newest first.
    pub async fn list_mine(
        &self,
        caller: &User,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ValidationRequest>, AppError> {
        enforce(caller, Permission::Read)?;
        let now = self.clock.now();

        // Overdue rows are still stored as pending, so filter after the
        // expiry view is applied.
        let stored_filter = match status {
            Some(RequestStatus::Pending) | Some(RequestStatus::Expired) | None => None,
            other => other,
        };
        let mut mine: Vec<ValidationRequest> = self
            .store
            .list_initiated_by(&caller.id, stored_filter)
            .await?
            .into_iter()
            .map(|r| r.as_of(now))
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(mine)
    }

    /// A single request, visible to its initiator and its approver.
    pub async fn get_request(&self, caller: &User, id: &str) -> Result<ValidationRequest, AppError> {
        enforce(caller, Permission::Read)?;
        let request = self.load(id).await?;
        if request.initiated_by.id != caller.id && request.assigned_approver != caller.id {
            return Err(AppError::unauthorized("this request is not yours to view"));
        }
        Ok(request.as_of(self.clock.now()))
    }

    pub async fn list_eligible_approvers(&self, caller: &User) -> Result<Vec<User>, AppError> {
        enforce(caller, Permission::Read)?;
        Ok(self
            .store
            .list_users()
            .await?
            .into_iter()
            .filter(|u| u.is_eligible_approver() && u.id != caller.id)
            .collect())
    }

    // -- Decisions --

    pub async fn accept(&self, caller: &User, id: &str) -> Result<ValidationRequest, AppError> {
        let now = self.clock.now();
        self.decide(caller, id, Transition::accept(now)).await
    }

    pub async fn reject(
        &self,
        caller: &User,
        id: &str,
        reason: &str,
    ) -> Result<ValidationRequest, AppError> {
        validate_rejection_reason(reason)?;
        let now = self.clock.now();
        self.decide(caller, id, Transition::reject(reason, now)).await
    }

    async fn decide(
        &self,
        caller: &User,
        id: &str,
        transition: Transition,
    ) -> Result<ValidationRequest, AppError> {
        let request = self.load(id).await?;

        if request.assigned_approver != caller.id {
            tracing::warn!(
                request_id = %id,
                caller = %caller.id,
                approver = %request.assigned_approver,
                "decision attempted by someone other than the assigned approver"
            );
            return Err(AppError::unauthorized(
                "only the assigned approver can decide this request",
            ));
        }
        enforce(caller, Permission::DecideValidation)?;

        self.check_decidable(&request).await?;

        if !self.store.transition(id, &transition).await? {
            // Lost a race. Report what actually happened.
            let current = self.load(id).await?;
            return Err(self.refused(&current));
        }

        let mut decided = request;
        transition.apply_to(&mut decided);
        tracing::info!(
            request_id = %decided.id,
            status = %decided.status,
            approver = %caller.id,
            "validation request decided"
        );
        self.metrics.record_decision(match decided.status {
            RequestStatus::Rejected => DecisionOutcome::Rejected,
            _ => DecisionOutcome::Accepted,
        });
        self.settled(&decided).await;

        Ok(decided)
    }

    /// Side effects of a request leaving `pending`: the approver's notice is
    /// retired, the initiator is told, webhooks fire.
    async fn settled(&self, request: &ValidationRequest) {
        if let Err(e) = self
            .store
            .mark_request_notices_read(&request.id, &request.assigned_approver)
            .await
        {
            tracing::error!(request_id = %request.id, "failed to retire approver notice: {}", e);
        }

        let outcome = match request.status {
            RequestStatus::Accepted => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Expired => "expired",
            RequestStatus::Pending => return,
        };
        self.notify(Notification {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: request.initiated_by.id.clone(),
            kind: NotificationKind::ValidationDecision,
            title: format!("{} {}", request.action_type.label(), outcome),
            body: request.rejection_reason.clone(),
            data: serde_json::to_value(DecisionNotice::from_request(request)).ok(),
            is_read: false,
            created_at: self.clock.now(),
        })
        .await;
        if let Some(event) = ValidationEvent::decided(request) {
            self.webhook.dispatch(event);
        }
    }

    /// `Ok` when `request` may still be decided; expires it on the way if
    /// its deadline has passed.
    async fn check_decidable(&self, request: &ValidationRequest) -> Result<(), AppError> {
        if request.status.is_terminal() {
            return Err(self.refused(request));
        }
        if request.is_overdue(self.clock.now()) {
            self.expire(request).await?;
            return Err(AppError::expired(format!(
                "request {} expired at {}",
                request.id,
                request.expires_at.to_rfc3339()
            )));
        }
        Ok(())
    }

    fn refused(&self, current: &ValidationRequest) -> AppError {
        match current.status {
            RequestStatus::Expired => {
                self.metrics.record_decision(DecisionOutcome::Expired);
                AppError::expired(format!("request {} has expired", current.id))
            }
            status => {
                self.metrics.record_decision(DecisionOutcome::Conflict);
                AppError::conflict(format!("request {} is already {}", current.id, status))
            }
        }
    }

    async fn expire(&self, request: &ValidationRequest) -> Result<(), AppError> {
        if self.store.transition(&request.id, &Transition::expire()).await? {
            let mut expired = request.clone();
            Transition::expire().apply_to(&mut expired);
            self.on_expired(&expired).await;
        }
        Ok(())
    }

    async fn on_expired(&self, request: &ValidationRequest) {
        tracing::info!(request_id = %request.id, "validation request expired");
        self.metrics.record_decision(DecisionOutcome::Expired);
        self.settled(request).await;
    }

    async fn load(&self, id: &str) -> Result<ValidationRequest, AppError> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("validation request {}", id)))
    }

    /// Materialize `expired` for every overdue request. Used by the sweep job.
    pub async fn expire_overdue(&self) -> Result<usize, AppError> {
        let expired = self.store.expire_overdue(self.clock.now()).await?;
        for request in &expired {
            self.on_expired(request).await;
        }
        Ok(expired.len())
    }

    // -- Execution --

    /// Claim the authorization of an accepted request. Only its initiator
    /// may claim it, and only once.
    pub async fn consume(&self, caller: &User, id: &str) -> Result<ValidationRequest, AppError> {
        let request = self.owned_by_initiator(caller, id).await?;
        match request.status {
            RequestStatus::Accepted => {}
            RequestStatus::Expired => {
                return Err(AppError::expired(format!(
                    "request {} expired before it was approved",
                    id
                )))
            }
            status => {
                return Err(AppError::conflict(format!(
                    "request {} is {}, not accepted",
                    id, status
                )))
            }
        }

        let now = self.clock.now();
        if request.consumed_at.is_some() || !self.store.consume(id, now).await? {
            tracing::warn!(request_id = %id, caller = %caller.id, "replayed execution refused");
            return Err(AppError::conflict(format!("request {} was already executed", id)));
        }

        let mut consumed = request;
        consumed.consumed_at = Some(now);
        tracing::info!(
            request_id = %id,
            action_type = %consumed.action_type,
            "execution authorization consumed"
        );
        Ok(consumed)
    }

    /// Give back a claimed authorization after the action failed.
    pub async fn release(&self, caller: &User, id: &str) -> Result<ValidationRequest, AppError> {
        let mut request = self.owned_by_initiator(caller, id).await?;
        if !self.store.release(id).await? {
            return Err(AppError::conflict(format!(
                "request {} holds no execution authorization",
                id
            )));
        }
        request.consumed_at = None;
        tracing::warn!(request_id = %id, "execution authorization released");
        Ok(request)
    }

    async fn owned_by_initiator(
        &self,
        caller: &User,
        id: &str,
    ) -> Result<ValidationRequest, AppError> {
        let request = self.load(id).await?;
        if request.initiated_by.id != caller.id {
            return Err(AppError::unauthorized(
                "only the initiator can execute an approved action",
            ));
        }
        enforce(caller, Permission::InitiateValidation)?;
        Ok(request.as_of(self.clock.now()))
    }

    // -- Notifications --

    pub async fn list_notifications(
        &self,
        caller: &User,
        unread_only: bool,
    ) -> Result<Vec<Notification>, AppError> {
        enforce(caller, Permission::Read)?;
        Ok(self
            .store
            .list_notifications(&caller.id, unread_only, self.settings.notification_limit)
            .await?)
    }

    pub async fn mark_notification_read(&self, caller: &User, id: &str) -> Result<(), AppError> {
        enforce(caller, Permission::Read)?;
        if self.store.mark_notification_read(id, &caller.id).await? {
            Ok(())
        } else {
            Err(AppError::not_found(format!("notification {}", id)))
        }
    }

    /// Notifications are a side effect; failing to store one never fails
    /// the operation that caused it.
    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.store.insert_notification(&notification).await {
            tracing::error!(
                recipient = %notification.recipient_id,
                kind = ?notification.kind,
                "failed to store notification: {}",
                e
            );
        }
    }

    // -- Administration --

    /// Create or replace a user and return a freshly issued bearer token.
    pub async fn issue_user(&self, id: &str, name: &str, role: Role) -> Result<String, AppError> {
        use rand::RngCore;

        let mut raw = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = format!("tnt_{}", hex::encode(raw));

        let user = User {
            id: id.to_string(),
            name: name.to_string(),
            role,
            is_active: true,
        };
        self.store.upsert_user(&user, Some(&hash_token(&token))).await?;
        tracing::info!(user_id = %id, role = %role, "issued user token");
        Ok(token)
    }
}

/// Approver backlog order: `created_at` ascending, then `id` ascending.
pub fn sort_oldest_first(requests: &mut [ValidationRequest]) {
    requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::fixture;

    #[tokio::test]
    async fn test_issued_token_authenticates_and_is_stored_hashed() {
        let f = fixture().await;
        let token = f.authority.issue_user("t3", "Binta", Role::Treasurer).await.unwrap();

        let hex_part = token.strip_prefix("tnt_").unwrap();
        assert_eq!(hex_part.len(), 48);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));

        assert_eq!(f.authority.authenticate(&token).await.unwrap().id, "t3");
        assert!(f.authority.store().find_user_by_token_hash(&token).await.unwrap().is_none());
    }
}
