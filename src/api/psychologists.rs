/// Psychologist endpoints: availability, slot search and student enrollment
use super::extract::{JsonBody, ValidatedJson};
use crate::{
    auth::{AuthContext, PsychologistAuth},
    availability::{
        Availability, AvailabilityException, AvailabilitySlot, DaySchedule, ExceptionInput,
        ScheduleInput,
    },
    calendar,
    context::AppContext,
    enrollment::{Enrolled, StudentEnrollment},
    error::{PortalError, PortalResult},
    profile::{PsychologistProfile, StudentProfile},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/psychologists", get(list_psychologists))
        .route(
            "/psychologists/availability",
            get(get_availability).put(update_schedule),
        )
        .route(
            "/psychologists/availability-exceptions",
            post(upsert_exception),
        )
        .route(
            "/psychologists/availability-exceptions/:date",
            delete(remove_exception),
        )
        .route("/psychologists/:id/available-slots", get(available_slots))
        .route("/psychologists/students/enroll", post(enroll_student))
        .route("/psychologists/students", get(list_students))
        .route("/psychologists/students/:id", get(get_student))
}

async fn list_psychologists(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> PortalResult<Json<Vec<PsychologistProfile>>> {
    Ok(Json(ctx.enrollment.list_psychologists().await?))
}

async fn get_availability(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
) -> PortalResult<Json<Availability>> {
    Ok(Json(ctx.availability.get_availability(auth.account_id()).await?))
}

async fn update_schedule(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
    JsonBody(req): JsonBody<ScheduleInput>,
) -> PortalResult<Json<Vec<DaySchedule>>> {
    Ok(Json(
        ctx.availability
            .update_schedule(auth.account_id(), &req.schedule)
            .await?,
    ))
}

async fn upsert_exception(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
    JsonBody(req): JsonBody<ExceptionInput>,
) -> PortalResult<Json<AvailabilityException>> {
    Ok(Json(
        ctx.availability
            .upsert_exception(auth.account_id(), &req)
            .await?,
    ))
}

async fn remove_exception(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
    Path(date): Path<String>,
) -> PortalResult<StatusCode> {
    ctx.availability
        .remove_exception(auth.account_id(), &date)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SlotQuery {
    date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AvailableSlotsResponse {
    psychologist_id: String,
    date: String,
    day_of_week: u8,
    slots: Vec<AvailabilitySlot>,
}

async fn available_slots(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
    Path(id): Path<String>,
    Query(query): Query<SlotQuery>,
) -> PortalResult<Json<AvailableSlotsResponse>> {
    let raw = query
        .date
        .ok_or_else(|| PortalError::Validation("date query parameter is required".to_string()))?;
    let date = calendar::parse_date(&raw, ctx.availability.timezone())?;
    let slots = ctx.availability.compute_available_slots(&id, &date).await?;

    Ok(Json(AvailableSlotsResponse {
        psychologist_id: id,
        date: calendar::format_date(&date),
        day_of_week: calendar::day_of_week(&date),
        slots,
    }))
}

async fn enroll_student(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
    ValidatedJson(req): ValidatedJson<StudentEnrollment>,
) -> PortalResult<(StatusCode, Json<Enrolled<StudentProfile>>)> {
    let enrolled = ctx.enrollment.enroll_student(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(enrolled)))
}

async fn list_students(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
) -> PortalResult<Json<Vec<StudentProfile>>> {
    Ok(Json(ctx.enrollment.list_students(auth.account_id()).await?))
}

async fn get_student(
    State(ctx): State<AppContext>,
    PsychologistAuth(auth): PsychologistAuth,
    Path(id): Path<String>,
) -> PortalResult<Json<StudentProfile>> {
    Ok(Json(ctx.enrollment.get_student(&auth.actor, &id).await?))
}
