/// Admin Permission Management
use crate::error::{PortalError, PortalResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Fine-grained admin permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminPermission {
    /// Suspend and reactivate accounts
    UserManagement,
    /// Enroll psychologists
    PsychologistManagement,
    /// Read aggregate reports
    ReportGeneration,
    /// Grant and revoke permissions, manage seminars
    SystemConfiguration,
}

impl AdminPermission {
    pub const ALL: [AdminPermission; 4] = [
        AdminPermission::UserManagement,
        AdminPermission::PsychologistManagement,
        AdminPermission::ReportGeneration,
        AdminPermission::SystemConfiguration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AdminPermission::UserManagement => "user_management",
            AdminPermission::PsychologistManagement => "psychologist_management",
            AdminPermission::ReportGeneration => "report_generation",
            AdminPermission::SystemConfiguration => "system_configuration",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s.to_lowercase().as_str() {
            "user_management" => Ok(AdminPermission::UserManagement),
            "psychologist_management" => Ok(AdminPermission::PsychologistManagement),
            "report_generation" => Ok(AdminPermission::ReportGeneration),
            "system_configuration" => Ok(AdminPermission::SystemConfiguration),
            _ => Err(PortalError::Validation(format!("Invalid permission: {}", s))),
        }
    }
}

/// Permission grant record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub account_id: String,
    pub permission: AdminPermission,
    pub granted_by: Option<String>,
    pub granted_at: DateTime<Utc>,
}

/// Admin permission manager
#[derive(Clone)]
pub struct AdminPermissionManager {
    db: SqlitePool,
}

impl AdminPermissionManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a grant on an existing connection; an existing grant is left as is
    pub async fn insert_grant(
        conn: &mut SqliteConnection,
        account_id: &str,
        permission: AdminPermission,
        granted_by: Option<&str>,
    ) -> PortalResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_permission (account_id, permission, granted_by, granted_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (account_id, permission) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(permission.as_str())
        .bind(granted_by)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Grant a permission to an admin account
    pub async fn grant(
        &self,
        account_id: &str,
        permission: AdminPermission,
        granted_by: &str,
    ) -> PortalResult<PermissionGrant> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM account WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        match role.as_deref() {
            Some("admin") => {}
            Some(_) => {
                return Err(PortalError::Validation(
                    "Permissions can only be granted to admin accounts".to_string(),
                ))
            }
            None => return Err(PortalError::NotFound(format!("Admin {} not found", account_id))),
        }

        let mut conn = self.db.acquire().await?;
        Self::insert_grant(&mut conn, account_id, permission, Some(granted_by)).await?;
        drop(conn);

        self.log_action(
            granted_by,
            "grant_permission",
            Some(account_id),
            Some(permission.as_str()),
        )
        .await?;

        tracing::info!(
            "Permission {} granted to {} by {}",
            permission.as_str(),
            account_id,
            granted_by
        );

        self.list(account_id)
            .await?
            .into_iter()
            .find(|grant| grant.permission == permission)
            .ok_or_else(|| PortalError::Internal("Granted permission not found".to_string()))
    }

    /// Revoke a permission
    pub async fn revoke(
        &self,
        account_id: &str,
        permission: AdminPermission,
        revoked_by: &str,
    ) -> PortalResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM admin_permission
            WHERE account_id = ? AND permission = ?
            "#,
        )
        .bind(account_id)
        .bind(permission.as_str())
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::NotFound(format!(
                "Permission {} not held by {}",
                permission.as_str(),
                account_id
            )));
        }

        self.log_action(
            revoked_by,
            "revoke_permission",
            Some(account_id),
            Some(permission.as_str()),
        )
        .await?;

        tracing::info!(
            "Permission {} revoked from {} by {}",
            permission.as_str(),
            account_id,
            revoked_by
        );

        Ok(())
    }

    /// List grants held by an account
    pub async fn list(&self, account_id: &str) -> PortalResult<Vec<PermissionGrant>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, permission, granted_by, granted_at
            FROM admin_permission
            WHERE account_id = ?
            ORDER BY permission
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await?;

        let mut grants = Vec::new();
        for row in rows {
            let permission: String = row.get("permission");
            grants.push(PermissionGrant {
                account_id: row.get("account_id"),
                permission: AdminPermission::from_str(&permission)?,
                granted_by: row.get("granted_by"),
                granted_at: row.try_get("granted_at")?,
            });
        }

        Ok(grants)
    }

    /// Permissions held by an account
    pub async fn permissions(&self, account_id: &str) -> PortalResult<Vec<AdminPermission>> {
        Ok(self
            .list(account_id)
            .await?
            .into_iter()
            .map(|grant| grant.permission)
            .collect())
    }

    pub async fn has_permission(
        &self,
        account_id: &str,
        permission: AdminPermission,
    ) -> PortalResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM admin_permission WHERE account_id = ? AND permission = ?",
        )
        .bind(account_id)
        .bind(permission.as_str())
        .fetch_one(&self.db)
        .await?;

        Ok(count > 0)
    }

    /// Log admin action to audit log
    pub async fn log_action(
        &self,
        admin_id: &str,
        action: &str,
        subject_id: Option<&str>,
        details: Option<&str>,
    ) -> PortalResult<()> {
        let mut conn = self.db.acquire().await?;
        Self::record_action(&mut conn, admin_id, action, subject_id, details).await
    }

    /// Write an audit entry on a caller-owned connection or transaction
    pub async fn record_action(
        conn: &mut SqliteConnection,
        admin_id: &str,
        action: &str,
        subject_id: Option<&str>,
        details: Option<&str>,
    ) -> PortalResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_audit_log (admin_id, action, subject_id, details, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(admin_id)
        .bind(action)
        .bind(subject_id)
        .bind(details)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Most recent audit entries
    pub async fn recent_actions(&self, limit: i64) -> PortalResult<Vec<super::AuditLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, admin_id, action, subject_id, details, timestamp
            FROM admin_audit_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(super::AuditLogEntry {
                id: row.get("id"),
                admin_id: row.get("admin_id"),
                action: row.get("action"),
                subject_id: row.get("subject_id"),
                details: row.get("details"),
                timestamp: row.try_get("timestamp")?,
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountManager, AccountStatus, NewAccount, Role};
    use crate::config::ServerConfig;
    use crate::db;
    use std::sync::Arc;

    async fn setup() -> (SqlitePool, String, String) {
        let db = db::create_memory_pool().await.unwrap();
        let accounts = AccountManager::new(
            db.clone(),
            Arc::new(ServerConfig::for_testing("/tmp/carepath-test".into())),
        );

        let admin = accounts
            .create_account(NewAccount {
                email: "root@uni.edu".to_string(),
                password: "password-1".to_string(),
                role: Role::Admin,
                status: AccountStatus::Active,
                created_by: None,
            })
            .await
            .unwrap();
        let student = accounts
            .create_account(NewAccount {
                email: "s@uni.edu".to_string(),
                password: "password-1".to_string(),
                role: Role::Student,
                status: AccountStatus::Active,
                created_by: None,
            })
            .await
            .unwrap();

        (db, admin.id, student.id)
    }

    #[test]
    fn test_permission_from_str() {
        for permission in AdminPermission::ALL {
            assert_eq!(
                AdminPermission::from_str(permission.as_str()).unwrap(),
                permission
            );
        }
        assert!(AdminPermission::from_str("superpowers").is_err());
    }

    #[tokio::test]
    async fn test_grant_and_revoke() {
        let (db, admin_id, _) = setup().await;
        let manager = AdminPermissionManager::new(db);

        assert!(!manager
            .has_permission(&admin_id, AdminPermission::ReportGeneration)
            .await
            .unwrap());

        let grant = manager
            .grant(&admin_id, AdminPermission::ReportGeneration, &admin_id)
            .await
            .unwrap();
        assert_eq!(grant.permission, AdminPermission::ReportGeneration);

        // Granting twice is harmless
        manager
            .grant(&admin_id, AdminPermission::ReportGeneration, &admin_id)
            .await
            .unwrap();
        assert_eq!(manager.permissions(&admin_id).await.unwrap().len(), 1);

        manager
            .revoke(&admin_id, AdminPermission::ReportGeneration, &admin_id)
            .await
            .unwrap();
        assert!(!manager
            .has_permission(&admin_id, AdminPermission::ReportGeneration)
            .await
            .unwrap());

        assert!(matches!(
            manager
                .revoke(&admin_id, AdminPermission::ReportGeneration, &admin_id)
                .await,
            Err(PortalError::NotFound(_))
        ));

        let log = manager.recent_actions(10).await.unwrap();
        assert_eq!(log[0].action, "revoke_permission");
    }

    #[tokio::test]
    async fn test_grant_to_non_admin_rejected() {
        let (db, admin_id, student_id) = setup().await;
        let manager = AdminPermissionManager::new(db);

        assert!(matches!(
            manager
                .grant(&student_id, AdminPermission::UserManagement, &admin_id)
                .await,
            Err(PortalError::Validation(_))
        ));
        assert!(matches!(
            manager
                .grant("missing", AdminPermission::UserManagement, &admin_id)
                .await,
            Err(PortalError::NotFound(_))
        ));
    }
}
