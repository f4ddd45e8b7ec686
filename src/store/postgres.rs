use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::Store;
use crate::models::notification::{Notification, NotificationKind};
use crate::models::user::User;
use crate::models::validation_request::{
    ActionType, RequestStatus, ResourceType, Transition, UserRef, ValidationRequest,
};

const REQUEST_COLUMNS: &str = "id, action_type, resource_type, resource_id, resource_name, reason, \
     initiated_by_id, initiated_by_name, assigned_approver, status, rejection_reason, \
     created_at, expires_at, decided_at, consumed_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ValidationRequestRow {
    id: String,
    action_type: ActionType,
    resource_type: ResourceType,
    resource_id: String,
    resource_name: String,
    reason: String,
    initiated_by_id: String,
    initiated_by_name: String,
    assigned_approver: String,
    status: RequestStatus,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    consumed_at: Option<DateTime<Utc>>,
}

impl From<ValidationRequestRow> for ValidationRequest {
    fn from(row: ValidationRequestRow) -> Self {
        ValidationRequest {
            id: row.id,
            action_type: row.action_type,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            resource_name: row.resource_name,
            reason: row.reason,
            initiated_by: UserRef {
                id: row.initiated_by_id,
                name: row.initiated_by_name,
            },
            assigned_approver: row.assigned_approver,
            status: row.status,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
            expires_at: row.expires_at,
            decided_at: row.decided_at,
            consumed_at: row.consumed_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: String,
    recipient_id: String,
    kind: NotificationKind,
    title: String,
    body: Option<String>,
    data: Option<serde_json::Value>,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification {
            id: row.id,
            recipient_id: row.recipient_id,
            kind: row.kind,
            title: row.title,
            body: row.body,
            data: row.data,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    // -- User Operations --

    async fn find_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, name, role, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, name, role, is_active FROM users WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(
            "SELECT id, name, role, is_active FROM users ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_user(&self, user: &User, token_hash: Option<&str>) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO users (id, name, role, is_active, token_hash)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (id) DO UPDATE
               SET name = EXCLUDED.name,
                   role = EXCLUDED.role,
                   is_active = EXCLUDED.is_active,
                   token_hash = COALESCE(EXCLUDED.token_hash, users.token_hash)"#,
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(user.role)
        .bind(user.is_active)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Validation Request Operations --

    async fn insert_request(&self, request: &ValidationRequest) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO validation_requests
                 (id, action_type, resource_type, resource_id, resource_name, reason,
                  initiated_by_id, initiated_by_name, assigned_approver, status,
                  rejection_reason, created_at, expires_at, decided_at, consumed_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(&request.id)
        .bind(request.action_type)
        .bind(request.resource_type)
        .bind(&request.resource_id)
        .bind(&request.resource_name)
        .bind(&request.reason)
        .bind(&request.initiated_by.id)
        .bind(&request.initiated_by.name)
        .bind(&request.assigned_approver)
        .bind(request.status)
        .bind(&request.rejection_reason)
        .bind(request.created_at)
        .bind(request.expires_at)
        .bind(request.decided_at)
        .bind(request.consumed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("insert_request failed: {:?}", e);
            e
        })?;
        Ok(())
    }

    async fn get_request(&self, id: &str) -> anyhow::Result<Option<ValidationRequest>> {
        let row = sqlx::query_as::<_, ValidationRequestRow>(&format!(
            "SELECT {} FROM validation_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list_pending_for(&self, approver_id: &str) -> anyhow::Result<Vec<ValidationRequest>> {
        let rows = sqlx::query_as::<_, ValidationRequestRow>(&format!(
            "SELECT {} FROM validation_requests \
             WHERE assigned_approver = $1 AND status = 'pending' \
             ORDER BY created_at ASC, id ASC",
            REQUEST_COLUMNS
        ))
        .bind(approver_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_initiated_by(
        &self,
        initiator_id: &str,
        status: Option<RequestStatus>,
    ) -> anyhow::Result<Vec<ValidationRequest>> {
        let rows = sqlx::query_as::<_, ValidationRequestRow>(&format!(
            "SELECT {} FROM validation_requests \
             WHERE initiated_by_id = $1 AND ($2::VARCHAR IS NULL OR status = $2) \
             ORDER BY created_at DESC, id DESC",
            REQUEST_COLUMNS
        ))
        .bind(initiator_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn transition(&self, id: &str, transition: &Transition) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE validation_requests
               SET status = $1, rejection_reason = $2, decided_at = $3
               WHERE id = $4 AND status = 'pending'"#,
        )
        .bind(transition.to)
        .bind(&transition.rejection_reason)
        .bind(transition.decided_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<ValidationRequest>> {
        let rows = sqlx::query_as::<_, ValidationRequestRow>(&format!(
            "UPDATE validation_requests \
             SET status = 'expired' \
             WHERE status = 'pending' AND expires_at <= $1 \
             RETURNING {}",
            REQUEST_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn consume(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE validation_requests
               SET consumed_at = $1
               WHERE id = $2 AND status = 'accepted' AND consumed_at IS NULL"#,
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE validation_requests
               SET consumed_at = NULL
               WHERE id = $1 AND consumed_at IS NOT NULL"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Notification Operations --

    async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO notifications (id, recipient_id, kind, title, body, data, is_read, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&notification.id)
        .bind(&notification.recipient_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.data)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: usize,
    ) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"SELECT id, recipient_id, kind, title, body, data, is_read, created_at
               FROM notifications
               WHERE recipient_id = $1 AND ($2 = false OR is_read = false)
               ORDER BY created_at DESC
               LIMIT $3"#,
        )
        .bind(recipient_id)
        .bind(unread_only)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_notification_read(&self, id: &str, recipient_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE notifications SET is_read = true WHERE id = $1 AND recipient_id = $2"#,
        )
        .bind(id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_request_notices_read(
        &self,
        request_id: &str,
        recipient_id: &str,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"UPDATE notifications SET is_read = true
               WHERE recipient_id = $1
                 AND kind = 'VALIDATION_REQUEST'
                 AND is_read = false
                 AND data->>'validationRequestId' = $2"#,
        )
        .bind(recipient_id)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
