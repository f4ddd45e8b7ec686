use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

/// Minimum trimmed length of a rejection reason.
pub const MIN_REJECTION_REASON_LEN: usize = 10;

/// Sensitive actions that require a second party's approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    ActivateUser,
    DeactivateUser,
    DeleteUser,
    BlockTontine,
    UnblockTontine,
    DeleteTontine,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::ActivateUser,
        ActionType::DeactivateUser,
        ActionType::DeleteUser,
        ActionType::BlockTontine,
        ActionType::UnblockTontine,
        ActionType::DeleteTontine,
    ];

    /// The kind of entity this action targets.
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ActionType::ActivateUser | ActionType::DeactivateUser | ActionType::DeleteUser => {
                ResourceType::User
            }
            ActionType::BlockTontine | ActionType::UnblockTontine | ActionType::DeleteTontine => {
                ResourceType::Tontine
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionType::ActivateUser => "Activate user",
            ActionType::DeactivateUser => "Deactivate user",
            ActionType::DeleteUser => "Delete user",
            ActionType::BlockTontine => "Block tontine",
            ActionType::UnblockTontine => "Unblock tontine",
            ActionType::DeleteTontine => "Delete tontine",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ActivateUser => "ACTIVATE_USER",
            ActionType::DeactivateUser => "DEACTIVATE_USER",
            ActionType::DeleteUser => "DELETE_USER",
            ActionType::BlockTontine => "BLOCK_TONTINE",
            ActionType::UnblockTontine => "UNBLOCK_TONTINE",
            ActionType::DeleteTontine => "DELETE_TONTINE",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        ActionType::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| format!("unknown action type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "PascalCase")]
pub enum ResourceType {
    User,
    Tontine,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::User => "User",
            ResourceType::Tontine => "Tontine",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(ResourceType::User),
            "tontine" => Ok(ResourceType::Tontine),
            other => Err(format!("unknown resource type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            "expired" => Ok(RequestStatus::Expired),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Id plus display name of a user, captured when the request was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub id: String,
    pub action_type: ActionType,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub resource_name: String,
    pub reason: String,
    pub initiated_by: UserRef,
    pub assigned_approver: String,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    /// When the approved action was claimed for execution. Only ever set on
    /// an accepted request, and at most once.
    #[serde(default)]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl ValidationRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// A pending request whose deadline has passed. Expiry is enforced
    /// lazily, so such a record may still be stored as `pending`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now >= self.expires_at
    }

    /// Copy of this record as it must be reported at `now`.
    pub fn as_of(&self, now: DateTime<Utc>) -> ValidationRequest {
        let mut view = self.clone();
        if view.is_overdue(now) {
            view.status = RequestStatus::Expired;
        }
        view
    }

    /// Checks the record-level invariants: rejection reason present iff
    /// rejected (and long enough), decision timestamp present iff decided.
    pub fn check_invariants(&self) -> Result<(), String> {
        match (&self.status, &self.rejection_reason) {
            (RequestStatus::Rejected, None) => {
                return Err(format!("request {} is rejected without a reason", self.id))
            }
            (RequestStatus::Rejected, Some(r)) if r.trim().chars().count() < MIN_REJECTION_REASON_LEN => {
                return Err(format!("request {} has a rejection reason shorter than {} characters", self.id, MIN_REJECTION_REASON_LEN))
            }
            (RequestStatus::Rejected, Some(_)) => {}
            (status, Some(_)) => {
                return Err(format!("request {} is {} but carries a rejection reason", self.id, status))
            }
            (_, None) => {}
        }

        let decided = matches!(self.status, RequestStatus::Accepted | RequestStatus::Rejected);
        if decided != self.decided_at.is_some() {
            return Err(format!(
                "request {} is {} but decidedAt is {}",
                self.id,
                self.status,
                if self.decided_at.is_some() { "set" } else { "missing" }
            ));
        }

        if self.consumed_at.is_some() && self.status != RequestStatus::Accepted {
            return Err(format!("request {} is {} but was consumed", self.id, self.status));
        }

        if self.reason.trim().is_empty() || self.resource_name.trim().is_empty() || self.assigned_approver.is_empty() {
            return Err(format!("request {} is missing required fields", self.id));
        }

        Ok(())
    }
}

/// Body of a creation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewValidationRequest {
    pub action_type: ActionType,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub resource_name: String,
    pub reason: String,
    pub assigned_approver: String,
}

impl NewValidationRequest {
    /// Protocol-level checks shared by the client and the authority.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.reason.trim().is_empty() {
            return Err(WorkflowError::Validation("a reason is required".into()));
        }
        if self.resource_id.trim().is_empty() {
            return Err(WorkflowError::Validation("a target resource is required".into()));
        }
        if self.resource_name.trim().is_empty() {
            return Err(WorkflowError::Validation("the target resource needs a name".into()));
        }
        if self.assigned_approver.trim().is_empty() {
            return Err(WorkflowError::Validation("an approver must be selected".into()));
        }
        if self.action_type.resource_type() != self.resource_type {
            return Err(WorkflowError::Validation(format!(
                "{} applies to a {}, not a {}",
                self.action_type.label(),
                self.action_type.resource_type(),
                self.resource_type
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

/// Rejection reasons are checked on their trimmed length but stored verbatim.
pub fn validate_rejection_reason(reason: &str) -> Result<(), WorkflowError> {
    if reason.trim().chars().count() < MIN_REJECTION_REASON_LEN {
        return Err(WorkflowError::Validation(format!(
            "a rejection reason of at least {} characters is required",
            MIN_REJECTION_REASON_LEN
        )));
    }
    Ok(())
}

/// Status change applied by the authority to a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: RequestStatus,
    pub rejection_reason: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Transition {
    pub fn accept(at: DateTime<Utc>) -> Self {
        Self {
            to: RequestStatus::Accepted,
            rejection_reason: None,
            decided_at: Some(at),
        }
    }

    pub fn reject(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            to: RequestStatus::Rejected,
            rejection_reason: Some(reason.into()),
            decided_at: Some(at),
        }
    }

    pub fn expire() -> Self {
        Self {
            to: RequestStatus::Expired,
            rejection_reason: None,
            decided_at: None,
        }
    }

    pub fn apply_to(&self, request: &mut ValidationRequest) {
        request.status = self.to;
        request.rejection_reason = self.rejection_reason.clone();
        request.decided_at = self.decided_at;
    }
}
