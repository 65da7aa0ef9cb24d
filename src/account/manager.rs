/// Account manager implementation using runtime queries
/// Queries are built at runtime so no DATABASE_URL is needed during compilation

use crate::{
    account::{password, AccountStatus, NewAccount, Role, ValidatedSession},
    config::ServerConfig,
    db::account::{Account, AuthSession, ACCOUNT_COLUMNS},
    error::{PortalError, PortalResult},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub role: Role,
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
}

/// Freshly issued credential
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub session: AuthSession,
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Insert an account on an existing connection or transaction.
    ///
    /// Enrollment calls this inside its own transaction so the account and the
    /// profile are committed together.
    pub async fn insert_account(
        conn: &mut SqliteConnection,
        new_account: NewAccount,
    ) -> PortalResult<Account> {
        let email = new_account.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(PortalError::Validation("Email is required".to_string()));
        }

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE email = ?1 AND role = ?2")
                .bind(&email)
                .bind(new_account.role.as_str())
                .fetch_one(&mut *conn)
                .await?;
        if existing > 0 {
            return Err(PortalError::Conflict(format!(
                "An account with email {} already exists for role {}",
                email,
                new_account.role.as_str()
            )));
        }

        let password_hash = password::hash(&new_account.password)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let (created_by, creator_role) = match new_account.created_by {
            Some((id, role)) => (Some(id), Some(role)),
            None => (None, None),
        };

        sqlx::query(
            "INSERT INTO account (id, email, password_hash, role, status, created_by, creator_role,
                                  failed_login_attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
        )
        .bind(&id)
        .bind(&email)
        .bind(&password_hash)
        .bind(new_account.role.as_str())
        .bind(new_account.status.as_str())
        .bind(&created_by)
        .bind(creator_role.map(|r| r.as_str()))
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                PortalError::Conflict(format!("Email {} is already registered", email))
            } else {
                PortalError::Database(e)
            }
        })?;

        Ok(Account {
            id,
            email,
            password_hash,
            role: new_account.role,
            status: new_account.status,
            created_by,
            creator_role,
            last_login: None,
            failed_login_attempts: 0,
            lockout_until: None,
            created_at: now,
        })
    }

    /// Create a standalone account
    pub async fn create_account(&self, new_account: NewAccount) -> PortalResult<Account> {
        let mut conn = self.db.acquire().await?;
        Self::insert_account(&mut conn, new_account).await
    }

    /// Authenticate and issue a bearer credential
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> PortalResult<(Account, IssuedToken)> {
        let email = email.trim().to_lowercase();
        let account = match self.find_by_email(&email, role).await? {
            Some(account) => account,
            None => {
                tracing::debug!("login: no {} account for {}", role.as_str(), email);
                return Err(PortalError::Unauthorized("Invalid credentials".to_string()));
            }
        };

        let now = Utc::now();
        if account.status == AccountStatus::Suspended {
            return Err(PortalError::Forbidden("Account is suspended".to_string()));
        }
        if account.is_locked(now) {
            return Err(PortalError::Forbidden(
                "Account is temporarily locked after repeated failed logins".to_string(),
            ));
        }

        if !password::verify(password, &account.password_hash)? {
            crate::metrics::record_login(false);
            self.record_failed_login(&account, now).await?;
            return Err(PortalError::Unauthorized("Invalid credentials".to_string()));
        }

        sqlx::query(
            "UPDATE account SET failed_login_attempts = 0, lockout_until = NULL, last_login = ?1
             WHERE id = ?2",
        )
        .bind(now)
        .bind(&account.id)
        .execute(&self.db)
        .await?;

        let issued = self.issue_token(&account.id, account.role).await?;
        crate::metrics::record_login(true);
        tracing::info!("Account {} logged in as {}", account.id, account.role.as_str());

        let account = Account {
            last_login: Some(now),
            failed_login_attempts: 0,
            lockout_until: None,
            ..account
        };
        Ok((account, issued))
    }

    async fn record_failed_login(&self, account: &Account, now: DateTime<Utc>) -> PortalResult<()> {
        let attempts = account.failed_login_attempts + 1;
        let max = self.config.authentication.max_failed_logins;

        if attempts >= max {
            let until = now + Duration::minutes(self.config.authentication.lockout_minutes);
            tracing::warn!(
                "Account {} locked until {} after {} failed logins",
                account.id,
                until,
                attempts
            );
            sqlx::query(
                "UPDATE account SET failed_login_attempts = 0, lockout_until = ?1 WHERE id = ?2",
            )
            .bind(until)
            .bind(&account.id)
            .execute(&self.db)
            .await?;
        } else {
            sqlx::query("UPDATE account SET failed_login_attempts = ?1 WHERE id = ?2")
                .bind(attempts)
                .bind(&account.id)
                .execute(&self.db)
                .await?;
        }

        Ok(())
    }

    /// Create an auth session and sign an access token for it
    pub async fn issue_token(&self, account_id: &str, role: Role) -> PortalResult<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + Duration::minutes(self.config.authentication.access_token_ttl_minutes);
        let session = AuthSession {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            role,
            created_at: now,
            expires_at,
            revoked_at: None,
        };

        sqlx::query(
            "INSERT INTO auth_session (id, account_id, role, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&session.id)
        .bind(&session.account_id)
        .bind(role.as_str())
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.db)
        .await?;

        let claims = AccessClaims {
            sub: account_id.to_string(),
            role,
            sid: session.id.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes()),
        )
        .map_err(|e| PortalError::Internal(format!("Failed to generate token: {}", e)))?;

        Ok(IssuedToken { token, session })
    }

    /// Validate access token and return session info.
    ///
    /// The role embedded in the token must still match the stored account role.
    pub async fn validate_access_token(&self, token: &str) -> PortalResult<ValidatedSession> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 30;

        let claims = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!("Access token rejected: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    PortalError::Unauthorized("Token has expired".to_string())
                }
                _ => PortalError::Unauthorized("Invalid token".to_string()),
            }
        })?
        .claims;

        let row = sqlx::query(
            "SELECT id, account_id, role, created_at, expires_at, revoked_at
             FROM auth_session WHERE id = ?1",
        )
        .bind(&claims.sid)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| PortalError::Unauthorized("Invalid or expired session".to_string()))?;
        let session = AuthSession::from_row(&row)?;

        if session.account_id != claims.sub || session.revoked_at.is_some() {
            return Err(PortalError::Unauthorized("Invalid or expired session".to_string()));
        }
        if Utc::now() > session.expires_at {
            return Err(PortalError::Unauthorized("Session expired".to_string()));
        }

        let account = self
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| PortalError::Unauthorized("Account no longer exists".to_string()))?;

        if account.role != claims.role {
            tracing::warn!(
                "Stale credential for {}: token role {} but account role {}",
                account.id,
                claims.role.as_str(),
                account.role.as_str()
            );
            return Err(PortalError::Unauthorized(
                "Credential role no longer matches account".to_string(),
            ));
        }
        if account.status == AccountStatus::Suspended {
            return Err(PortalError::Forbidden("Account is suspended".to_string()));
        }

        Ok(ValidatedSession {
            account_id: account.id,
            session_id: session.id,
            role: account.role,
            email: account.email,
        })
    }

    /// Revoke an auth session (logout)
    pub async fn revoke_session(&self, session_id: &str) -> PortalResult<()> {
        sqlx::query("UPDATE auth_session SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL")
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Get account by id
    pub async fn get_account(&self, id: &str) -> PortalResult<Account> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("Account {} not found", id)))
    }

    pub async fn find_by_id(&self, id: &str) -> PortalResult<Option<Account>> {
        let query = format!("SELECT {} FROM account WHERE id = ?1", ACCOUNT_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.db).await?;
        row.as_ref().map(Account::from_row).transpose()
    }

    pub async fn find_by_email(&self, email: &str, role: Role) -> PortalResult<Option<Account>> {
        let query = format!(
            "SELECT {} FROM account WHERE email = ?1 AND role = ?2",
            ACCOUNT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(email.trim().to_lowercase())
            .bind(role.as_str())
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(Account::from_row).transpose()
    }

    /// List accounts, optionally filtered by role and status
    pub async fn list_accounts(
        &self,
        role: Option<Role>,
        status: Option<AccountStatus>,
        limit: i64,
        offset: i64,
    ) -> PortalResult<Vec<Account>> {
        let query = format!(
            "SELECT {} FROM account
             WHERE (?1 IS NULL OR role = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at ASC, id ASC
             LIMIT ?3 OFFSET ?4",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(role.map(|r| r.as_str()))
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(Account::from_row).collect()
    }

    /// Count accounts grouped by role and status
    pub async fn count_by_role_and_status(&self) -> PortalResult<Vec<(Role, AccountStatus, i64)>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT role, status, COUNT(*) FROM account GROUP BY role, status ORDER BY role, status",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(role, status, count)| {
                Ok((Role::from_str(&role)?, AccountStatus::from_str(&status)?, count))
            })
            .collect()
    }

    /// Soft status transition; suspension also revokes outstanding credentials
    pub async fn set_status(&self, id: &str, status: AccountStatus) -> PortalResult<Account> {
        let result = sqlx::query("UPDATE account SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::NotFound(format!("Account {} not found", id)));
        }

        if status == AccountStatus::Suspended {
            sqlx::query(
                "UPDATE auth_session SET revoked_at = ?1 WHERE account_id = ?2 AND revoked_at IS NULL",
            )
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db)
            .await?;
        }

        tracing::info!("Account {} status set to {}", id, status.as_str());
        self.get_account(id).await
    }

    /// Change password after verifying the current one
    pub async fn change_password(
        &self,
        id: &str,
        current_password: &str,
        new_password: &str,
    ) -> PortalResult<()> {
        let account = self.get_account(id).await?;
        if !password::verify(current_password, &account.password_hash)? {
            return Err(PortalError::Unauthorized(
                "Current password is incorrect".to_string(),
            ));
        }

        let new_hash = password::hash(new_password)?;
        sqlx::query("UPDATE account SET password_hash = ?1 WHERE id = ?2")
            .bind(&new_hash)
            .bind(id)
            .execute(&self.db)
            .await?;

        tracing::info!("Password changed for account {}", id);
        Ok(())
    }

    /// Delete expired and revoked auth sessions
    pub async fn cleanup_expired_sessions(&self) -> PortalResult<u64> {
        let result = sqlx::query(
            "DELETE FROM auth_session WHERE expires_at < ?1 OR revoked_at IS NOT NULL",
        )
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Clear lockouts whose window has passed
    pub async fn clear_expired_lockouts(&self) -> PortalResult<u64> {
        let result = sqlx::query(
            "UPDATE account SET lockout_until = NULL, failed_login_attempts = 0
             WHERE lockout_until IS NOT NULL AND lockout_until < ?1",
        )
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}
