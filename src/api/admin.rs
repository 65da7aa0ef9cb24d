/// Admin API Endpoints
/// Account oversight, permission grants, psychologist enrollment and reports
use super::extract::{JsonBody, ValidatedJson};
use crate::{
    account::{AccountStatus, Role},
    admin::{AdminPermission, AuditLogEntry, PermissionGrant, PermissionRequest},
    auth::AdminAuth,
    context::AppContext,
    db::account::Account,
    enrollment::{Enrolled, PsychologistEnrollment},
    error::PortalResult,
    profile::PsychologistProfile,
    reports::{PortalStats, ReportRange, SessionSummary},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Enrollment
        .route("/admin/psychologists", post(enroll_psychologist))
        // Accounts
        .route("/admin/accounts", get(list_accounts))
        .route("/admin/accounts/:id/status", patch(update_account_status))
        // Permissions
        .route(
            "/admin/permissions",
            post(grant_permission).delete(revoke_permission),
        )
        .route("/admin/permissions/:account_id", get(list_permissions))
        // Dashboard and reports
        .route("/admin/stats", get(get_stats))
        .route("/admin/reports/sessions", get(session_report))
        .route("/admin/audit-log", get(audit_log))
}

async fn enroll_psychologist(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    ValidatedJson(req): ValidatedJson<PsychologistEnrollment>,
) -> PortalResult<(StatusCode, Json<Enrolled<PsychologistProfile>>)> {
    crate::require_permission!(admin, AdminPermission::PsychologistManagement);

    let enrolled = ctx.enrollment.enroll_psychologist(admin.actor(), req).await?;
    Ok((StatusCode::CREATED, Json(enrolled)))
}

#[derive(Debug, Deserialize)]
struct ListAccountsQuery {
    role: Option<Role>,
    status: Option<AccountStatus>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_accounts(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    Query(query): Query<ListAccountsQuery>,
) -> PortalResult<Json<Vec<Account>>> {
    crate::require_permission!(admin, AdminPermission::UserManagement);

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);
    let accounts = ctx
        .account_manager
        .list_accounts(query.role, query.status, limit, offset)
        .await?;
    Ok(Json(accounts))
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: AccountStatus,
}

async fn update_account_status(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<StatusRequest>,
) -> PortalResult<Json<Account>> {
    crate::require_permission!(admin, AdminPermission::UserManagement);

    let account = ctx.account_manager.set_status(&id, req.status).await?;
    ctx.permission_manager
        .log_action(
            &admin.actor().account_id,
            "set_account_status",
            Some(id.as_str()),
            Some(req.status.as_str()),
        )
        .await?;
    Ok(Json(account))
}

async fn grant_permission(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    ValidatedJson(req): ValidatedJson<PermissionRequest>,
) -> PortalResult<(StatusCode, Json<PermissionGrant>)> {
    crate::require_permission!(admin, AdminPermission::SystemConfiguration);

    let grant = ctx
        .permission_manager
        .grant(&req.account_id, req.permission, &admin.actor().account_id)
        .await?;
    Ok((StatusCode::CREATED, Json(grant)))
}

async fn revoke_permission(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    ValidatedJson(req): ValidatedJson<PermissionRequest>,
) -> PortalResult<StatusCode> {
    crate::require_permission!(admin, AdminPermission::SystemConfiguration);

    ctx.permission_manager
        .revoke(&req.account_id, req.permission, &admin.actor().account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_permissions(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    Path(account_id): Path<String>,
) -> PortalResult<Json<Vec<PermissionGrant>>> {
    crate::require_permission!(admin, AdminPermission::SystemConfiguration);
    Ok(Json(ctx.permission_manager.list(&account_id).await?))
}

/// Dashboard counters; open to every admin
async fn get_stats(
    State(ctx): State<AppContext>,
    _admin: AdminAuth,
) -> PortalResult<Json<PortalStats>> {
    Ok(Json(ctx.reports.portal_stats().await?))
}

async fn session_report(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    Query(range): Query<ReportRange>,
) -> PortalResult<Json<SessionSummary>> {
    crate::require_permission!(admin, AdminPermission::ReportGeneration);
    Ok(Json(ctx.reports.session_summary(&range).await?))
}

#[derive(Debug, Deserialize)]
struct AuditLogQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AuditLogResponse {
    entries: Vec<AuditLogEntry>,
}

async fn audit_log(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    Query(query): Query<AuditLogQuery>,
) -> PortalResult<Json<AuditLogResponse>> {
    crate::require_permission!(admin, AdminPermission::SystemConfiguration);

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let entries = ctx.permission_manager.recent_actions(limit).await?;
    Ok(Json(AuditLogResponse { entries }))
}
