/// Background task implementations
use crate::{context::AppContext, error::PortalResult};

/// Delete auth sessions that expired or were revoked
pub async fn cleanup_expired_sessions(ctx: &AppContext) -> PortalResult<u64> {
    ctx.account_manager.cleanup_expired_sessions().await
}

/// Reset lockouts whose window has passed
pub async fn clear_expired_lockouts(ctx: &AppContext) -> PortalResult<u64> {
    ctx.account_manager.clear_expired_lockouts().await
}

/// Health check - verify all systems are operational
pub async fn health_check(ctx: &AppContext) -> PortalResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountStatus, NewAccount, Role},
        config::ServerConfig,
    };
    use chrono::{Duration, Utc};

    async fn context() -> AppContext {
        AppContext::in_memory(ServerConfig::for_testing("/tmp/carepath-jobs".into()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check_passes_on_live_pool() {
        let ctx = context().await;
        assert!(health_check(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_sessions() {
        let ctx = context().await;
        let account = ctx
            .account_manager
            .create_account(NewAccount {
                email: "s@uni.edu".to_string(),
                password: "password-1".to_string(),
                role: Role::Student,
                status: AccountStatus::Active,
                created_by: None,
            })
            .await
            .unwrap();
        let live = ctx
            .account_manager
            .issue_token(&account.id, Role::Student)
            .await
            .unwrap();
        let stale = ctx
            .account_manager
            .issue_token(&account.id, Role::Student)
            .await
            .unwrap();

        sqlx::query("UPDATE auth_session SET expires_at = ? WHERE id = ?")
            .bind(Utc::now() - Duration::hours(1))
            .bind(&stale.session.id)
            .execute(&ctx.db)
            .await
            .unwrap();

        assert_eq!(cleanup_expired_sessions(&ctx).await.unwrap(), 1);
        assert!(ctx
            .account_manager
            .validate_access_token(&live.token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_lockout_cleanup_with_nothing_locked() {
        let ctx = context().await;
        assert_eq!(clear_expired_lockouts(&ctx).await.unwrap(), 0);
    }
}
