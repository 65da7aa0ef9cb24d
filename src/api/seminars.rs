/// Seminar catalog endpoints
use super::extract::ValidatedJson;
use crate::{
    admin::AdminPermission,
    auth::{AdminAuth, AuthContext},
    context::AppContext,
    error::PortalResult,
    seminars::{Seminar, SeminarInput},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/seminars", get(list_seminars).post(create_seminar))
        .route(
            "/seminars/:id",
            get(get_seminar).put(update_seminar).delete(delete_seminar),
        )
}

async fn list_seminars(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> PortalResult<Json<Vec<Seminar>>> {
    Ok(Json(ctx.seminars.list_upcoming().await?))
}

async fn get_seminar(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<Seminar>> {
    Ok(Json(ctx.seminars.get(&id).await?))
}

async fn create_seminar(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    ValidatedJson(input): ValidatedJson<SeminarInput>,
) -> PortalResult<(StatusCode, Json<Seminar>)> {
    crate::require_permission!(admin, AdminPermission::SystemConfiguration);

    let seminar = ctx.seminars.create(admin.actor(), input).await?;
    ctx.permission_manager
        .log_action(
            &admin.actor().account_id,
            "create_seminar",
            Some(seminar.id.as_str()),
            Some(seminar.title.as_str()),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(seminar)))
}

async fn update_seminar(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    Path(id): Path<String>,
    ValidatedJson(input): ValidatedJson<SeminarInput>,
) -> PortalResult<Json<Seminar>> {
    crate::require_permission!(admin, AdminPermission::SystemConfiguration);

    let seminar = ctx.seminars.update(admin.actor(), &id, input).await?;
    ctx.permission_manager
        .log_action(&admin.actor().account_id, "update_seminar", Some(id.as_str()), None)
        .await?;
    Ok(Json(seminar))
}

async fn delete_seminar(
    State(ctx): State<AppContext>,
    admin: AdminAuth,
    Path(id): Path<String>,
) -> PortalResult<StatusCode> {
    crate::require_permission!(admin, AdminPermission::SystemConfiguration);

    ctx.seminars.delete(admin.actor(), &id).await?;
    ctx.permission_manager
        .log_action(&admin.actor().account_id, "delete_seminar", Some(id.as_str()), None)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
