use crate::errors::AppError;
use crate::models::user::{Role, User};

/// Permissions checked by the authority before touching a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// List eligible approvers, read own requests and notifications.
    Read,
    /// Package a critical action into a validation request.
    InitiateValidation,
    /// Accept or reject requests assigned to oneself.
    DecideValidation,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::InitiateValidation => "validation:initiate",
            Permission::DecideValidation => "validation:decide",
        }
    }
}

/// Check if this role has the required permission.
pub fn has_permission(role: Role, required: Permission) -> bool {
    match required {
        Permission::Read => true,
        Permission::InitiateValidation => role == Role::Admin,
        Permission::DecideValidation => role == Role::Treasurer,
    }
}

/// Helper for authority operations: `Unauthorized` when the caller's role
/// (or inactive account) does not allow `permission`.
pub fn enforce(user: &User, permission: Permission) -> Result<(), AppError> {
    if !user.is_active {
        tracing::warn!(user_id = %user.id, "RBAC access denied: inactive account");
        return Err(AppError::unauthorized("account is inactive"));
    }
    if !has_permission(user.role, permission) {
        tracing::warn!(
            user_id = %user.id,
            role = %user.role,
            permission = permission.as_str(),
            "RBAC access denied"
        );
        return Err(AppError::unauthorized(format!(
            "role '{}' may not perform '{}'",
            user.role,
            permission.as_str()
        )));
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────
