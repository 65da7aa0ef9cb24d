/// Account database models
use crate::{
    account::{AccountStatus, Role},
    error::{PortalError, PortalResult},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row};

/// Account record in the database
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
    /// Account that enrolled this one
    pub created_by: Option<String>,
    pub creator_role: Option<Role>,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_login_attempts: i64,
    pub lockout_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const ACCOUNT_COLUMNS: &str = "id, email, password_hash, role, status, created_by, creator_role, \
     last_login, failed_login_attempts, lockout_until, created_at";

impl Account {
    pub fn from_row(row: &SqliteRow) -> PortalResult<Self> {
        let role: String = row.try_get("role")?;
        let status: String = row.try_get("status")?;
        let creator_role: Option<String> = row.try_get("creator_role")?;

        Ok(Account {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: Role::from_str(&role)?,
            status: AccountStatus::from_str(&status)?,
            created_by: row.try_get("created_by")?,
            creator_role: creator_role.as_deref().map(Role::from_str).transpose()?,
            last_login: row.try_get("last_login")?,
            failed_login_attempts: row.try_get("failed_login_attempts")?,
            lockout_until: row.try_get("lockout_until")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Whether a lockout window is currently in force
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.map(|until| until > now).unwrap_or(false)
    }
}

/// Issued bearer credential record
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub account_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn from_row(row: &SqliteRow) -> PortalResult<Self> {
        let role: String = row.try_get("role")?;
        Ok(AuthSession {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            role: Role::from_str(&role)
                .map_err(|_| PortalError::Internal(format!("Invalid stored role: {}", role)))?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}
