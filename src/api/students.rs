/// Student endpoints
use crate::{
    auth::StudentAuth, context::AppContext, error::PortalResult, profile::PsychologistProfile,
};
use axum::{extract::State, routing::get, Json, Router};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/students/psychologist", get(assigned_psychologist))
}

/// The psychologist who enrolled the caller
async fn assigned_psychologist(
    State(ctx): State<AppContext>,
    StudentAuth(auth): StudentAuth,
) -> PortalResult<Json<PsychologistProfile>> {
    Ok(Json(
        ctx.enrollment
            .assigned_psychologist(auth.account_id())
            .await?,
    ))
}
