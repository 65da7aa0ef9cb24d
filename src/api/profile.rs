/// Own-profile endpoints; the store is picked by the caller's role
use super::extract::ValidatedJson;
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::PortalResult,
    profile::{Profile, ProfileUpdate},
};
use axum::{extract::State, routing::get, Json, Router};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/profile", get(get_profile).put(update_profile))
}

async fn get_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PortalResult<Json<Profile>> {
    let store = ctx.profiles.for_role(auth.role())?;
    Ok(Json(store.get_by_account(auth.account_id()).await?))
}

async fn update_profile(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ValidatedJson(update): ValidatedJson<ProfileUpdate>,
) -> PortalResult<Json<Profile>> {
    let store = ctx.profiles.for_role(auth.role())?;
    let profile = store.update(auth.account_id(), update).await?;
    tracing::info!("Profile of {} updated", auth.account_id());
    Ok(Json(profile))
}
