/// Login, logout and credential management endpoints
use super::extract::ValidatedJson;
use crate::{
    account::{ChangePasswordRequest, LoginRequest, LoginResponse},
    auth::AuthContext,
    context::AppContext,
    db::account::Account,
    error::PortalResult,
    profile::Profile,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/change-password", post(change_password))
}

async fn login(
    State(ctx): State<AppContext>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> PortalResult<Json<LoginResponse>> {
    let (account, issued) = ctx
        .account_manager
        .login(&req.email, &req.password, req.role)
        .await?;

    Ok(Json(LoginResponse {
        access_token: issued.token,
        expires_at: issued.session.expires_at,
        account_id: account.id,
        email: account.email,
        role: account.role,
    }))
}

async fn logout(State(ctx): State<AppContext>, auth: AuthContext) -> PortalResult<StatusCode> {
    ctx.account_manager
        .revoke_session(&auth.session.session_id)
        .await?;
    tracing::info!("Account {} logged out", auth.account_id());
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    account: Account,
    profile: Option<Profile>,
}

async fn me(State(ctx): State<AppContext>, auth: AuthContext) -> PortalResult<Json<MeResponse>> {
    let account = ctx.account_manager.get_account(auth.account_id()).await?;
    let profile = ctx
        .profiles
        .for_role(auth.role())?
        .find_by_account(auth.account_id())
        .await?;

    Ok(Json(MeResponse { account, profile }))
}

async fn change_password(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> PortalResult<StatusCode> {
    ctx.account_manager
        .change_password(auth.account_id(), &req.current_password, &req.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
