/// Authentication extractors and utilities
///
/// Every extractor re-validates the bearer credential against storage, so a
/// role change or suspension takes effect on the next request.
use crate::{
    account::{Actor, Role, ValidatedSession},
    admin::AdminPermission,
    api::middleware::extract_bearer_token,
    context::AppContext,
    error::{PortalError, PortalResult},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated context - extracts and validates session from request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session: ValidatedSession,
    pub actor: Actor,
}

impl AuthContext {
    pub fn account_id(&self) -> &str {
        &self.actor.account_id
    }

    pub fn role(&self) -> Role {
        self.actor.role
    }

    /// Fail with 403 unless the caller holds `role`
    pub fn require_role(&self, role: Role) -> PortalResult<()> {
        if self.actor.is(role) {
            Ok(())
        } else {
            tracing::warn!(
                "{} ({}) tried a {}-only operation",
                self.actor.account_id,
                self.actor.role.as_str(),
                role.as_str()
            );
            Err(PortalError::Forbidden(format!("{} role required", role.as_str())))
        }
    }
}

/// Validate a raw token; shared by the header extractor and the socket upgrade
pub async fn authenticate_token(ctx: &AppContext, token: &str) -> PortalResult<AuthContext> {
    let session = ctx.account_manager.validate_access_token(token).await?;
    let actor = Actor::new(session.account_id.clone(), session.role);
    Ok(AuthContext { session, actor })
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| PortalError::Unauthorized("Missing authorization header".to_string()))?;

        authenticate_token(state, &token).await
    }
}

/// Caller must be a student
#[derive(Debug, Clone)]
pub struct StudentAuth(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppContext> for StudentAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state).await?;
        auth.require_role(Role::Student)?;
        Ok(StudentAuth(auth))
    }
}

/// Caller must be a psychologist
#[derive(Debug, Clone)]
pub struct PsychologistAuth(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppContext> for PsychologistAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state).await?;
        auth.require_role(Role::Psychologist)?;
        Ok(PsychologistAuth(auth))
    }
}

/// Admin authentication context with the stored permission list
#[derive(Debug, Clone)]
pub struct AdminAuth {
    pub auth: AuthContext,
    pub permissions: Vec<AdminPermission>,
}

impl AdminAuth {
    pub fn actor(&self) -> &Actor {
        &self.auth.actor
    }

    pub fn has_permission(&self, permission: AdminPermission) -> bool {
        self.permissions.contains(&permission)
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state).await?;
        auth.require_role(Role::Admin)?;

        let permissions = state
            .permission_manager
            .permissions(auth.account_id())
            .await?;
        tracing::debug!(
            "Admin {} holds {} permission(s)",
            auth.account_id(),
            permissions.len()
        );

        Ok(AdminAuth { auth, permissions })
    }
}

/// Macro to require an admin permission
/// Usage: require_permission!(admin, AdminPermission::UserManagement);
#[macro_export]
macro_rules! require_permission {
    ($admin:expr, $required:expr) => {
        if !$admin.has_permission($required) {
            tracing::warn!(
                "Admin {} lacks permission {}",
                $admin.actor().account_id,
                $required.as_str()
            );
            return Err($crate::error::PortalError::Forbidden(format!(
                "Requires {} permission",
                $required.as_str()
            )));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    async fn context() -> AppContext {
        AppContext::in_memory(ServerConfig::for_testing("/tmp/carepath-test".into()))
            .await
            .unwrap()
    }

    fn gated(admin: &AdminAuth) -> PortalResult<()> {
        require_permission!(admin, AdminPermission::ReportGeneration);
        Ok(())
    }

    #[tokio::test]
    async fn test_token_yields_actor() {
        let ctx = context().await;
        let account = ctx
            .account_manager
            .create_account(crate::account::NewAccount {
                email: "s@uni.edu".to_string(),
                password: "password-1".to_string(),
                role: Role::Student,
                status: crate::account::AccountStatus::Active,
                created_by: None,
            })
            .await
            .unwrap();
        let issued = ctx
            .account_manager
            .issue_token(&account.id, Role::Student)
            .await
            .unwrap();

        let auth = authenticate_token(&ctx, &issued.token).await.unwrap();
        assert_eq!(auth.actor, Actor::new(account.id, Role::Student));
        assert!(auth.require_role(Role::Student).is_ok());
        assert!(matches!(
            auth.require_role(Role::Admin),
            Err(PortalError::Forbidden(_))
        ));

        assert!(matches!(
            authenticate_token(&ctx, "not-a-token").await,
            Err(PortalError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_require_permission_macro() {
        let session = ValidatedSession {
            account_id: "a1".to_string(),
            session_id: "s1".to_string(),
            role: Role::Admin,
            email: "a@uni.edu".to_string(),
        };
        let mut admin = AdminAuth {
            auth: AuthContext {
                actor: Actor::new("a1", Role::Admin),
                session,
            },
            permissions: vec![AdminPermission::UserManagement],
        };
        assert!(matches!(gated(&admin), Err(PortalError::Forbidden(_))));

        admin.permissions.push(AdminPermission::ReportGeneration);
        assert!(gated(&admin).is_ok());
    }
}
