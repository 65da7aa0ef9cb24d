/// Session booking and lifecycle endpoints
use super::extract::{JsonBody, OptionalJsonBody, ValidatedJson};
use crate::{
    account::Role,
    auth::{AuthContext, PsychologistAuth, StudentAuth},
    context::AppContext,
    error::{PortalError, PortalResult},
    scheduling::{
        BookingPolicy, CancelRequest, Feedback, NotesUpdate, RescheduleRequest, Session,
        SessionRequest, SessionView, StatusUpdate,
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/students/sessions", post(schedule_session))
        .route("/sessions/psychologist/upcoming", get(psychologist_upcoming))
        .route("/sessions/psychologist/past", get(psychologist_past))
        .route("/sessions/student/upcoming", get(student_upcoming))
        .route("/sessions/student/past", get(student_past))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/status", patch(update_status))
        .route("/sessions/:id/reschedule", put(reschedule).post(reschedule))
        .route("/sessions/:id/cancel", post(cancel))
        .route("/sessions/:id/notes", put(add_notes))
        .route("/sessions/:id/feedback", post(submit_feedback))
}

/// Direct booking by a psychologist (own calendar) or an admin
async fn create_session(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    JsonBody(mut req): JsonBody<SessionRequest>,
) -> PortalResult<(StatusCode, Json<Session>)> {
    match auth.role() {
        Role::Psychologist => req.psychologist_id = Some(auth.account_id().to_string()),
        Role::Admin => {}
        Role::Student => {
            return Err(PortalError::Forbidden(
                "Students book through /students/sessions".to_string(),
            ))
        }
    }

    let session = ctx
        .ledger
        .create_session(&req, BookingPolicy::OverlapOnly, auth.account_id())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Student self-booking against published availability
async fn schedule_session(
    State(ctx): State<AppContext>,
    StudentAuth(auth): StudentAuth,
    JsonBody(mut req): JsonBody<SessionRequest>,
) -> PortalResult<(StatusCode, Json<Session>)> {
    req.student_id = Some(auth.account_id().to_string());
    if req.psychologist_id.is_none() {
        let assigned = ctx
            .enrollment
            .assigned_psychologist(auth.account_id())
            .await?;
        req.psychologist_id = Some(assigned.account_id);
    }

    let session = ctx
        .ledger
        .create_session(&req, BookingPolicy::EnforceAvailability, auth.account_id())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn psychologist_upcoming(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
) -> PortalResult<Json<Vec<Session>>> {
    Ok(Json(ctx.ledger.list_for(&auth.actor, SessionView::Upcoming).await?))
}

async fn psychologist_past(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
) -> PortalResult<Json<Vec<Session>>> {
    Ok(Json(ctx.ledger.list_for(&auth.actor, SessionView::Past).await?))
}

async fn student_upcoming(
    State(ctx): State<AppContext>,
    StudentAuth(auth): StudentAuth,
) -> PortalResult<Json<Vec<Session>>> {
    Ok(Json(ctx.ledger.list_for(&auth.actor, SessionView::Upcoming).await?))
}

async fn student_past(
    State(ctx): State<AppContext>,
    StudentAuth(auth): StudentAuth,
) -> PortalResult<Json<Vec<Session>>> {
    Ok(Json(ctx.ledger.list_for(&auth.actor, SessionView::Past).await?))
}

async fn get_session(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> PortalResult<Json<Session>> {
    Ok(Json(ctx.ledger.get(&id, &auth.actor).await?))
}

async fn update_status(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<StatusUpdate>,
) -> PortalResult<Json<Session>> {
    Ok(Json(
        ctx.ledger.update_status(&id, &req.status, &auth.actor).await?,
    ))
}

async fn reschedule(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<RescheduleRequest>,
) -> PortalResult<Json<Session>> {
    Ok(Json(
        ctx.ledger
            .reschedule(&id, &req.date, &req.time, &auth.actor)
            .await?,
    ))
}

async fn cancel(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    OptionalJsonBody(body): OptionalJsonBody<CancelRequest>,
) -> PortalResult<Json<Session>> {
    let reason = body.and_then(|req| req.reason);
    Ok(Json(ctx.ledger.cancel(&id, reason, &auth.actor).await?))
}

async fn add_notes(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<NotesUpdate>,
) -> PortalResult<Json<Session>> {
    Ok(Json(ctx.ledger.add_notes(&id, &req.notes, &auth.actor).await?))
}

async fn submit_feedback(
    State(ctx): State<AppContext>,
    StudentAuth(auth): StudentAuth,
    Path(id): Path<String>,
    ValidatedJson(feedback): ValidatedJson<Feedback>,
) -> PortalResult<Json<Session>> {
    Ok(Json(
        ctx.ledger
            .submit_feedback(&id, &feedback, &auth.actor)
            .await?,
    ))
}
