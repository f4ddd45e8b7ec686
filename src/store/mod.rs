//! Persistence behind the reference authority.
//!
//! The store is dumb: it keeps records and offers compare-and-set
//! primitives, [`Store::transition`] out of `pending` and [`Store::consume`]
//! on an accepted request. Every rule of the workflow lives in
//! [`crate::authority`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::models::notification::Notification;
use crate::models::user::{Role, User};
use crate::models::validation_request::{RequestStatus, Transition, ValidationRequest};

pub mod memory;
pub mod postgres;

#[async_trait]
pub trait Store: Send + Sync {
    // -- Users --

    async fn find_user(&self, id: &str) -> anyhow::Result<Option<User>>;

    async fn find_user_by_token_hash(&self, token_hash: &str) -> anyhow::Result<Option<User>>;

    async fn list_users(&self) -> anyhow::Result<Vec<User>>;

    /// Insert or replace a user. A `token_hash` of `None` keeps the
    /// existing credential.
    async fn upsert_user(&self, user: &User, token_hash: Option<&str>) -> anyhow::Result<()>;

    // -- Validation requests --

    async fn insert_request(&self, request: &ValidationRequest) -> anyhow::Result<()>;

    async fn get_request(&self, id: &str) -> anyhow::Result<Option<ValidationRequest>>;

    /// Requests stored as `pending` and assigned to `approver_id`, any order.
    async fn list_pending_for(&self, approver_id: &str) -> anyhow::Result<Vec<ValidationRequest>>;

    async fn list_initiated_by(
        &self,
        initiator_id: &str,
        status: Option<RequestStatus>,
    ) -> anyhow::Result<Vec<ValidationRequest>>;

    /// Apply `transition` only if the request is still `pending`.
    /// Returns `false` when the request is missing or already terminal.
    async fn transition(&self, id: &str, transition: &Transition) -> anyhow::Result<bool>;

    /// Move every pending request with `expires_at <= now` to `expired`.
    /// Returns the changed records as stored afterwards.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ValidationRequest>>;

    /// Set `consumed_at` only if the request is `accepted` and not yet
    /// consumed.
    async fn consume(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Clear `consumed_at`. Returns `false` when nothing was consumed.
    async fn release(&self, id: &str) -> anyhow::Result<bool>;

    // -- Notifications --

    async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()>;

    /// Newest first, at most `limit` rows.
    async fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<Notification>>;

    async fn mark_notification_read(&self, id: &str, recipient_id: &str) -> anyhow::Result<bool>;

    /// Mark read every `VALIDATION_REQUEST` notice of `recipient_id` that
    /// points at `request_id`. Returns how many changed.
    async fn mark_request_notices_read(
        &self,
        request_id: &str,
        recipient_id: &str,
    ) -> anyhow::Result<u64>;
}

/// Bearer tokens are only ever stored as their SHA-256 hex digest.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// One entry of the users seed file (`TONTINE_USERS_FILE`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSeed {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub token: String,
}

fn default_active() -> bool {
    true
}

impl UserSeed {
    pub fn user(&self) -> User {
        User {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
            is_active: self.is_active,
        }
    }
}

pub fn load_seed_file(path: &str) -> anyhow::Result<Vec<UserSeed>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read users file {}: {}", path, e))?;
    let seeds: Vec<UserSeed> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid users file {}: {}", path, e))?;
    Ok(seeds)
}

/// Load seeds into any store.
pub async fn apply_seeds(store: &dyn Store, seeds: &[UserSeed]) -> anyhow::Result<()> {
    for seed in seeds {
        store
            .upsert_user(&seed.user(), Some(&hash_token(&seed.token)))
            .await?;
    }
    tracing::info!(count = seeds.len(), "seeded users");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let h = hash_token("secret");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token("secret"));
        assert_ne!(h, hash_token("Secret"));
        assert!(!h.contains("secret"));
    }

    #[test]
    fn test_seed_defaults_to_active() {
        let seeds: Vec<UserSeed> = serde_json::from_str(
            r#"[{"id":"t1","name":"Fatou","role":"treasurer","token":"tok"}]"#,
        )
        .unwrap();
        assert!(seeds[0].is_active);
        assert!(seeds[0].user().is_eligible_approver());
    }
}
