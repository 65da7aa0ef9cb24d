/// Admin permissions and audit trail
///
/// Admin accounts carry a list of fine-grained permissions; every admin
/// mutation is recorded in the audit log.

pub mod permissions;

pub use permissions::{AdminPermission, AdminPermissionManager, PermissionGrant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Admin action audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i64,
    pub admin_id: String,
    pub action: String,
    pub subject_id: Option<String>,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Grant or revoke request body
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[validate(length(min = 1, message = "accountId is required"))]
    pub account_id: String,
    pub permission: AdminPermission,
}
