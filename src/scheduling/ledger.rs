/// Session ledger implementation using runtime queries
use super::{
    BookingLocks, BookingPolicy, Feedback, Session, SessionRequest, SessionStatus, SessionType,
    SessionView,
};
use crate::{
    account::{Actor, Role},
    availability,
    calendar::{self, ClockTime, TimeRange},
    db,
    error::{PortalError, PortalResult},
    metrics,
};
use chrono::{FixedOffset, NaiveDate, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use uuid::Uuid;
use validator::Validate;

const SESSION_COLUMNS: &str = "id, psychologist_id, student_id, date, start_time, end_time, \
     duration_minutes, session_type, status, notes, feedback_rating, feedback_comments, \
     cancellation_reason, created_by, created_at, updated_at";

/// Session ledger service
pub struct SessionLedger {
    db: SqlitePool,
    locks: BookingLocks,
    tz: FixedOffset,
    default_session_minutes: u32,
}

/// What a caller wants to do with an existing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionAction {
    View,
    Manage,
    Cancel,
    Rate,
}

impl SessionLedger {
    pub fn new(db: SqlitePool, tz: FixedOffset, default_session_minutes: u32) -> Self {
        Self {
            db,
            locks: BookingLocks::new(),
            tz,
            default_session_minutes,
        }
    }

    /// Whether another scheduled session of the psychologist overlaps `[start, end)`
    pub async fn check_overlap(
        &self,
        psychologist_id: &str,
        date: &NaiveDate,
        range: &TimeRange,
        exclude_session_id: Option<&str>,
    ) -> PortalResult<bool> {
        let mut conn = self.db.acquire().await?;
        overlap_exists(&mut conn, psychologist_id, date, range, exclude_session_id).await
    }

    /// Book a new session.
    ///
    /// Runs under the day's booking lock and inside one write transaction, so
    /// two concurrent requests for the same time cannot both pass the check.
    pub async fn create_session(
        &self,
        request: &SessionRequest,
        policy: BookingPolicy,
        created_by: &str,
    ) -> PortalResult<Session> {
        let student_id = request
            .student_id
            .as_deref()
            .ok_or_else(|| PortalError::Validation("studentId is required".to_string()))?;
        let psychologist_id = request
            .psychologist_id
            .as_deref()
            .ok_or_else(|| PortalError::Validation("psychologistId is required".to_string()))?;
        let date = calendar::parse_date(&request.date, &self.tz)?;
        let range = request.interval(self.default_session_minutes)?;
        let session_type = request.kind()?;

        self.ensure_role(student_id, Role::Student).await?;
        self.ensure_role(psychologist_id, Role::Psychologist).await?;

        let _guard = self.locks.acquire(psychologist_id, date).await;

        if policy == BookingPolicy::EnforceAvailability {
            let mut conn = self.db.acquire().await?;
            let slots = availability::slots_on(&mut conn, psychologist_id, &date).await?;
            drop(conn);

            if !slots.iter().any(|slot| slot.range().contains(&range)) {
                metrics::record_booking(policy.as_str(), "unavailable");
                tracing::warn!(
                    "Booking rejected: {} not available on {} at {}-{}",
                    psychologist_id,
                    date,
                    range.start_time,
                    range.end_time
                );
                return Err(PortalError::Conflict(
                    "Psychologist is not available at the requested time".to_string(),
                ));
            }
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            psychologist_id: psychologist_id.to_string(),
            student_id: student_id.to_string(),
            date,
            start_time: range.start_time,
            end_time: range.end_time,
            duration_minutes: range.duration_minutes(),
            session_type,
            status: SessionStatus::Scheduled,
            notes: request.notes.clone(),
            feedback: None,
            cancellation_reason: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;
        touch_booking_guard(&mut *tx, psychologist_id, &date).await?;

        if overlap_exists(&mut *tx, psychologist_id, &date, &range, None).await? {
            metrics::record_booking(policy.as_str(), "conflict");
            tracing::warn!(
                "Booking rejected: overlap for {} on {} at {}-{}",
                psychologist_id,
                date,
                range.start_time,
                range.end_time
            );
            return Err(overlap_conflict());
        }

        let insert = sqlx::query(
            r#"
            INSERT INTO therapy_session (id, psychologist_id, student_id, date, start_time, end_time,
                duration_minutes, session_type, status, notes, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.psychologist_id)
        .bind(&session.student_id)
        .bind(calendar::format_date(&date))
        .bind(session.start_time.to_string())
        .bind(session.end_time.to_string())
        .bind(i64::from(session.duration_minutes))
        .bind(session.session_type.as_str())
        .bind(session.status.as_str())
        .bind(&session.notes)
        .bind(&session.created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;

        map_unique_violation(insert)?;
        tx.commit().await?;

        metrics::record_booking(policy.as_str(), "created");
        tracing::info!(
            "Session {} booked for {} with {} on {} at {}-{}",
            session.id,
            session.student_id,
            session.psychologist_id,
            date,
            session.start_time,
            session.end_time
        );

        Ok(session)
    }

    /// Load a session the caller may see
    pub async fn get(&self, session_id: &str, actor: &Actor) -> PortalResult<Session> {
        let session = self.load(session_id).await?;
        authorize(&session, actor, SessionAction::View)?;
        Ok(session)
    }

    /// Set any status from any status.
    ///
    /// Moving a session back to `scheduled` re-checks the overlap rule so the
    /// ledger never holds two overlapping scheduled sessions.
    pub async fn update_status(
        &self,
        session_id: &str,
        status: &str,
        actor: &Actor,
    ) -> PortalResult<Session> {
        let status = SessionStatus::from_str(status)?;
        let session = self.load(session_id).await?;
        authorize(&session, actor, SessionAction::Manage)?;

        let _guard = self.locks.acquire(&session.psychologist_id, session.date).await;
        let mut tx = self.db.begin().await?;

        if status == SessionStatus::Scheduled && session.status != SessionStatus::Scheduled {
            touch_booking_guard(&mut *tx, &session.psychologist_id, &session.date).await?;
            if overlap_exists(
                &mut *tx,
                &session.psychologist_id,
                &session.date,
                &session.range(),
                Some(session.id.as_str()),
            )
            .await?
            {
                return Err(overlap_conflict());
            }
        }

        let update = sqlx::query("UPDATE therapy_session SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(session_id)
            .execute(&mut *tx)
            .await;
        map_unique_violation(update)?;
        tx.commit().await?;

        metrics::record_session_transition(status.as_str());
        tracing::info!(
            "Session {} status {} -> {}",
            session_id,
            session.status.as_str(),
            status.as_str()
        );

        self.load(session_id).await
    }

    /// Move a session to a new date and start time, keeping its duration.
    ///
    /// The session is forced back to `scheduled`. On conflict nothing changes.
    pub async fn reschedule(
        &self,
        session_id: &str,
        new_date: &str,
        new_time: &str,
        actor: &Actor,
    ) -> PortalResult<Session> {
        let date = calendar::parse_date(new_date, &self.tz)?;
        let start = ClockTime::parse("Start time", new_time)?;

        let session = self.load(session_id).await?;
        authorize(&session, actor, SessionAction::Manage)?;
        let range = TimeRange::starting_at(start, session.duration_minutes)?;

        let _guard = self.locks.acquire(&session.psychologist_id, date).await;
        let mut tx = self.db.begin().await?;
        touch_booking_guard(&mut *tx, &session.psychologist_id, &date).await?;

        if overlap_exists(
            &mut *tx,
            &session.psychologist_id,
            &date,
            &range,
            Some(session.id.as_str()),
        )
        .await?
        {
            tracing::warn!(
                "Reschedule of {} to {} {} rejected: overlap",
                session_id,
                date,
                range.start_time
            );
            return Err(overlap_conflict());
        }

        let update = sqlx::query(
            r#"
            UPDATE therapy_session
            SET date = ?, start_time = ?, end_time = ?, status = 'scheduled', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(calendar::format_date(&date))
        .bind(range.start_time.to_string())
        .bind(range.end_time.to_string())
        .bind(Utc::now())
        .bind(session_id)
        .execute(&mut *tx)
        .await;
        map_unique_violation(update)?;
        tx.commit().await?;

        tracing::info!(
            "Session {} rescheduled from {} {} to {} {}",
            session_id,
            session.date,
            session.start_time,
            date,
            range.start_time
        );

        self.load(session_id).await
    }

    /// Cancel a session; cancelling again succeeds and overwrites the reason
    pub async fn cancel(
        &self,
        session_id: &str,
        reason: Option<String>,
        actor: &Actor,
    ) -> PortalResult<Session> {
        let session = self.load(session_id).await?;
        authorize(&session, actor, SessionAction::Cancel)?;

        sqlx::query(
            r#"
            UPDATE therapy_session
            SET status = 'cancelled', cancellation_reason = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&reason)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.db)
        .await?;

        metrics::record_session_transition(SessionStatus::Cancelled.as_str());
        tracing::info!("Session {} cancelled by {}", session_id, actor.account_id);

        self.load(session_id).await
    }

    /// Replace the session notes
    pub async fn add_notes(&self, session_id: &str, notes: &str, actor: &Actor) -> PortalResult<Session> {
        let session = self.load(session_id).await?;
        authorize(&session, actor, SessionAction::Manage)?;

        sqlx::query("UPDATE therapy_session SET notes = ?, updated_at = ? WHERE id = ?")
            .bind(notes)
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.db)
            .await?;

        tracing::debug!("Notes updated on session {}", session_id);
        self.load(session_id).await
    }

    /// Record the student's rating of a session
    pub async fn submit_feedback(
        &self,
        session_id: &str,
        feedback: &Feedback,
        actor: &Actor,
    ) -> PortalResult<Session> {
        feedback
            .validate()
            .map_err(|e| PortalError::Validation(e.to_string()))?;

        let session = self.load(session_id).await?;
        authorize(&session, actor, SessionAction::Rate)?;

        sqlx::query(
            r#"
            UPDATE therapy_session
            SET feedback_rating = ?, feedback_comments = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(i64::from(feedback.rating))
        .bind(&feedback.comments)
        .bind(Utc::now())
        .bind(session_id)
        .execute(&self.db)
        .await?;

        tracing::info!("Feedback {} recorded on session {}", feedback.rating, session_id);
        self.load(session_id).await
    }

    /// Sessions of a participant, split into upcoming and past
    pub async fn list_for(&self, actor: &Actor, view: SessionView) -> PortalResult<Vec<Session>> {
        let column = match actor.role {
            Role::Psychologist => "psychologist_id",
            Role::Student => "student_id",
            Role::Admin => {
                return Err(PortalError::Forbidden(
                    "Only students and psychologists have session lists".to_string(),
                ))
            }
        };

        let (today, now) = calendar::local_now(&self.tz);
        let upcoming = "status = 'scheduled' AND (date > ?2 OR (date = ?2 AND end_time > ?3))";
        let (filter, order) = match view {
            SessionView::Upcoming => (upcoming.to_string(), "date ASC, start_time ASC"),
            SessionView::Past => (format!("NOT ({})", upcoming), "date DESC, start_time DESC"),
        };

        let query = format!(
            "SELECT {} FROM therapy_session WHERE {} = ?1 AND {} ORDER BY {}",
            SESSION_COLUMNS, column, filter, order
        );
        let rows = sqlx::query(&query)
            .bind(&actor.account_id)
            .bind(calendar::format_date(&today))
            .bind(now.to_string())
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn load(&self, session_id: &str) -> PortalResult<Session> {
        let query = format!("SELECT {} FROM therapy_session WHERE id = ?", SESSION_COLUMNS);
        let row = sqlx::query(&query)
            .bind(session_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("Session {} not found", session_id)))?;

        session_from_row(&row)
    }

    async fn ensure_role(&self, account_id: &str, role: Role) -> PortalResult<()> {
        let stored: Option<String> = sqlx::query_scalar("SELECT role FROM account WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.db)
            .await?;

        if stored.as_deref() == Some(role.as_str()) {
            Ok(())
        } else {
            Err(PortalError::NotFound(format!(
                "{} {} not found",
                if role == Role::Student { "Student" } else { "Psychologist" },
                account_id
            )))
        }
    }
}

/// Ownership rules for session access
fn authorize(session: &Session, actor: &Actor, action: SessionAction) -> PortalResult<()> {
    let allowed = match actor.role {
        Role::Admin => true,
        Role::Psychologist => {
            session.psychologist_id == actor.account_id && action != SessionAction::Rate
        }
        Role::Student => {
            session.student_id == actor.account_id
                && matches!(
                    action,
                    SessionAction::View | SessionAction::Cancel | SessionAction::Rate
                )
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(PortalError::Forbidden(
            "Not permitted to access this session".to_string(),
        ))
    }
}

fn overlap_conflict() -> PortalError {
    PortalError::Conflict(
        "Psychologist already has a session scheduled at this time".to_string(),
    )
}

fn map_unique_violation(
    result: Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
) -> PortalResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if db::is_unique_violation(&e) => Err(overlap_conflict()),
        Err(e) => Err(PortalError::Database(e)),
    }
}

/// Write to the day's guard row so the transaction holds the database write
/// lock before it reads, serializing bookings across processes.
async fn touch_booking_guard(
    conn: &mut SqliteConnection,
    psychologist_id: &str,
    date: &NaiveDate,
) -> PortalResult<()> {
    sqlx::query(
        r#"
        INSERT INTO booking_guard (psychologist_id, date, version) VALUES (?, ?, 1)
        ON CONFLICT (psychologist_id, date) DO UPDATE SET version = version + 1
        "#,
    )
    .bind(psychologist_id)
    .bind(calendar::format_date(date))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn overlap_exists(
    conn: &mut SqliteConnection,
    psychologist_id: &str,
    date: &NaiveDate,
    range: &TimeRange,
    exclude_session_id: Option<&str>,
) -> PortalResult<bool> {
    // HH:MM is zero padded, so text comparison orders like time
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM therapy_session
        WHERE psychologist_id = ?1 AND date = ?2 AND status = 'scheduled'
          AND start_time < ?4 AND end_time > ?3
          AND (?5 IS NULL OR id != ?5)
        "#,
    )
    .bind(psychologist_id)
    .bind(calendar::format_date(date))
    .bind(range.start_time.to_string())
    .bind(range.end_time.to_string())
    .bind(exclude_session_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

fn session_from_row(row: &SqliteRow) -> PortalResult<Session> {
    let date: String = row.get("date");
    let start: String = row.get("start_time");
    let end: String = row.get("end_time");
    let session_type: String = row.get("session_type");
    let status: String = row.get("status");
    let duration: i64 = row.get("duration_minutes");
    let rating: Option<i64> = row.get("feedback_rating");

    Ok(Session {
        id: row.get("id"),
        psychologist_id: row.get("psychologist_id"),
        student_id: row.get("student_id"),
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| PortalError::Internal(format!("Stored session date is invalid: {}", e)))?,
        start_time: ClockTime::parse("startTime", &start)?,
        end_time: ClockTime::parse("endTime", &end)?,
        duration_minutes: duration as u32,
        session_type: SessionType::from_str(&session_type)?,
        status: SessionStatus::from_str(&status)?,
        notes: row.get("notes"),
        feedback: rating.map(|rating| Feedback {
            rating: rating as u8,
            comments: row.get("feedback_comments"),
        }),
        cancellation_reason: row.get("cancellation_reason"),
        created_by: row.get("created_by"),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountManager, AccountStatus, NewAccount};
    use crate::availability::{AvailabilityManager, DayScheduleInput, SlotInput};
    use crate::config::ServerConfig;
    use chrono::Duration;
    use proptest::prelude::*;
    use std::sync::Arc;

    struct Fixture {
        pool: SqlitePool,
        ledger: SessionLedger,
        availability: AvailabilityManager,
        psychologist: Actor,
        student: Actor,
        admin: Actor,
    }

    async fn fixture() -> Fixture {
        let pool = db::create_memory_pool().await.unwrap();
        let accounts = AccountManager::new(
            pool.clone(),
            Arc::new(ServerConfig::for_testing("/tmp/carepath-test".into())),
        );

        let mut ids = Vec::new();
        for (email, role) in [
            ("doc@uni.edu", Role::Psychologist),
            ("stu@uni.edu", Role::Student),
            ("admin@uni.edu", Role::Admin),
        ] {
            let account = accounts
                .create_account(NewAccount {
                    email: email.to_string(),
                    password: "password-1".to_string(),
                    role,
                    status: AccountStatus::Active,
                    created_by: None,
                })
                .await
                .unwrap();
            ids.push(Actor::new(account.id, role));
        }
        let admin = ids.pop().unwrap();
        let student = ids.pop().unwrap();
        let psychologist = ids.pop().unwrap();

        let utc = FixedOffset::east_opt(0).unwrap();
        Fixture {
            ledger: SessionLedger::new(pool.clone(), utc, 60),
            availability: AvailabilityManager::new(pool.clone(), utc),
            pool,
            psychologist,
            student,
            admin,
        }
    }

    fn request(f: &Fixture, date: &str, start: &str, end: &str) -> SessionRequest {
        SessionRequest {
            student_id: Some(f.student.account_id.clone()),
            psychologist_id: Some(f.psychologist.account_id.clone()),
            date: date.to_string(),
            start_time: Some(start.to_string()),
            end_time: Some(end.to_string()),
            ..Default::default()
        }
    }

    async fn book(f: &Fixture, date: &str, start: &str, end: &str) -> PortalResult<Session> {
        f.ledger
            .create_session(
                &request(f, date, start, end),
                BookingPolicy::OverlapOnly,
                &f.psychologist.account_id,
            )
            .await
    }

    async fn assert_no_overlaps(pool: &SqlitePool) {
        let pairs: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM therapy_session a JOIN therapy_session b
              ON a.psychologist_id = b.psychologist_id AND a.date = b.date AND a.id < b.id
            WHERE a.status = 'scheduled' AND b.status = 'scheduled'
              AND a.start_time < b.end_time AND a.end_time > b.start_time
            "#,
        )
        .fetch_one(pool)
        .await
        .unwrap();
        assert_eq!(pairs, 0);
    }

    #[tokio::test]
    async fn test_overlap_detection() {
        let f = fixture().await;
        book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let psych = &f.psychologist.account_id;
        let check = |start: &str, end: &str| TimeRange::parse(start, end).unwrap();

        assert!(f.ledger.check_overlap(psych, &date, &check("09:30", "10:30"), None).await.unwrap());
        assert!(f.ledger.check_overlap(psych, &date, &check("08:00", "12:00"), None).await.unwrap());
        // Touching intervals do not overlap
        assert!(!f.ledger.check_overlap(psych, &date, &check("10:00", "11:00"), None).await.unwrap());
        assert!(!f.ledger.check_overlap(psych, &date, &check("08:00", "09:00"), None).await.unwrap());

        assert!(matches!(
            book(&f, "2025-06-02", "09:30", "10:30").await,
            Err(PortalError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_sessions_free_the_slot() {
        let f = fixture().await;
        let session = book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();
        let cancelled = f
            .ledger
            .cancel(&session.id, Some("ill".to_string()), &f.student)
            .await
            .unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("ill"));

        // Cancelling twice is fine
        f.ledger.cancel(&session.id, None, &f.student).await.unwrap();

        book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();

        // Reviving the cancelled one would now overlap
        assert!(matches!(
            f.ledger
                .update_status(&session.id, "scheduled", &f.psychologist)
                .await,
            Err(PortalError::Conflict(_))
        ));
        assert_no_overlaps(&f.pool).await;
    }

    #[tokio::test]
    async fn test_missing_participants() {
        let f = fixture().await;
        let mut req = request(&f, "2025-06-02", "09:00", "10:00");
        req.student_id = Some(f.psychologist.account_id.clone());
        assert!(matches!(
            f.ledger
                .create_session(&req, BookingPolicy::OverlapOnly, &f.admin.account_id)
                .await,
            Err(PortalError::NotFound(_))
        ));

        let mut req = request(&f, "2025-06-02", "09:00", "10:00");
        req.psychologist_id = Some("ghost".to_string());
        assert!(matches!(
            f.ledger
                .create_session(&req, BookingPolicy::OverlapOnly, &f.admin.account_id)
                .await,
            Err(PortalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = fixture().await;
        assert!(matches!(
            book(&f, "02/06/2025", "09:00", "10:00").await,
            Err(PortalError::Validation(_))
        ));
        assert!(matches!(
            book(&f, "2025-06-02", "10:00", "09:00").await,
            Err(PortalError::Validation(_))
        ));
        assert!(matches!(
            f.ledger.update_status("nope", "scheduled", &f.admin).await,
            Err(PortalError::NotFound(_))
        ));

        let session = book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();
        assert!(matches!(
            f.ledger.update_status(&session.id, "finished", &f.admin).await,
            Err(PortalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_status_has_no_transition_guard() {
        let f = fixture().await;
        let session = book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();

        for status in ["completed", "no-show", "cancelled", "scheduled", "completed"] {
            let updated = f
                .ledger
                .update_status(&session.id, status, &f.psychologist)
                .await
                .unwrap();
            assert_eq!(updated.status.as_str(), status);
        }
    }

    #[tokio::test]
    async fn test_reschedule_round_trip() {
        let f = fixture().await;
        let session = book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();
        f.ledger
            .update_status(&session.id, "completed", &f.psychologist)
            .await
            .unwrap();

        let moved = f
            .ledger
            .reschedule(&session.id, "2025-06-03", "14:00", &f.psychologist)
            .await
            .unwrap();
        assert_eq!(moved.id, session.id);
        assert_eq!(moved.status, SessionStatus::Scheduled);
        assert_eq!(moved.end_time.to_string(), "15:00");
        assert_eq!(moved.duration_minutes, 60);

        let back = f
            .ledger
            .reschedule(&session.id, "2025-06-02", "09:00", &f.psychologist)
            .await
            .unwrap();
        assert_eq!(back.date, session.date);
        assert_eq!(back.range(), session.range());

        // Rescheduling onto itself is not a conflict
        f.ledger
            .reschedule(&session.id, "2025-06-02", "09:30", &f.psychologist)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reschedule_conflict_leaves_session_unchanged() {
        let f = fixture().await;
        let first = book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();
        book(&f, "2025-06-02", "11:00", "12:00").await.unwrap();

        assert!(matches!(
            f.ledger
                .reschedule(&first.id, "2025-06-02", "11:30", &f.psychologist)
                .await,
            Err(PortalError::Conflict(_))
        ));

        let unchanged = f.ledger.get(&first.id, &f.psychologist).await.unwrap();
        assert_eq!(unchanged.start_time.to_string(), "09:00");
    }

    #[tokio::test]
    async fn test_notes_and_feedback() {
        let f = fixture().await;
        let session = book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();

        f.ledger.add_notes(&session.id, "first", &f.psychologist).await.unwrap();
        let noted = f.ledger.add_notes(&session.id, "second", &f.psychologist).await.unwrap();
        assert_eq!(noted.notes.as_deref(), Some("second"));

        // Students cannot write notes
        assert!(matches!(
            f.ledger.add_notes(&session.id, "mine", &f.student).await,
            Err(PortalError::Forbidden(_))
        ));

        let bad = Feedback {
            rating: 6,
            comments: None,
        };
        assert!(matches!(
            f.ledger.submit_feedback(&session.id, &bad, &f.student).await,
            Err(PortalError::Validation(_))
        ));

        let good = Feedback {
            rating: 4,
            comments: Some("helpful".to_string()),
        };
        assert!(matches!(
            f.ledger.submit_feedback(&session.id, &good, &f.psychologist).await,
            Err(PortalError::Forbidden(_))
        ));
        let rated = f
            .ledger
            .submit_feedback(&session.id, &good, &f.student)
            .await
            .unwrap();
        assert_eq!(rated.feedback, Some(good));
    }

    #[tokio::test]
    async fn test_other_psychologist_cannot_touch_session() {
        let f = fixture().await;
        let session = book(&f, "2025-06-02", "09:00", "10:00").await.unwrap();
        let stranger = Actor::new("someone-else", Role::Psychologist);

        assert!(matches!(
            f.ledger.get(&session.id, &stranger).await,
            Err(PortalError::Forbidden(_))
        ));
        assert!(matches!(
            f.ledger.cancel(&session.id, None, &stranger).await,
            Err(PortalError::Forbidden(_))
        ));
        assert!(f.ledger.get(&session.id, &f.admin).await.is_ok());
    }

    #[tokio::test]
    async fn test_upcoming_and_past_views() {
        let f = fixture().await;
        let tomorrow = calendar::format_date(&(Utc::now().date_naive() + Duration::days(1)));
        let last_week = calendar::format_date(&(Utc::now().date_naive() - Duration::days(7)));

        let future = book(&f, &tomorrow, "09:00", "10:00").await.unwrap();
        let old = book(&f, &last_week, "09:00", "10:00").await.unwrap();
        let cancelled = book(&f, &tomorrow, "11:00", "12:00").await.unwrap();
        f.ledger.cancel(&cancelled.id, None, &f.student).await.unwrap();

        let upcoming = f
            .ledger
            .list_for(&f.student, SessionView::Upcoming)
            .await
            .unwrap();
        assert_eq!(upcoming.iter().map(|s| &s.id).collect::<Vec<_>>(), vec![&future.id]);

        let past = f
            .ledger
            .list_for(&f.psychologist, SessionView::Past)
            .await
            .unwrap();
        let past_ids: Vec<_> = past.iter().map(|s| s.id.clone()).collect();
        assert!(past_ids.contains(&old.id));
        assert!(past_ids.contains(&cancelled.id));
        assert!(!past_ids.contains(&future.id));
    }

    #[tokio::test]
    async fn test_monday_slot_booked_then_conflict() {
        let f = fixture().await;
        let psych = f.psychologist.account_id.clone();
        f.availability
            .update_schedule(
                &psych,
                &[DayScheduleInput {
                    day_of_week: 1,
                    slots: vec![SlotInput::new("09:00", "10:00"), SlotInput::new("10:00", "11:00")],
                }],
            )
            .await
            .unwrap();

        let monday = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert_eq!(
            f.availability.compute_available_slots(&psych, &monday).await.unwrap().len(),
            2
        );

        let student_booking = request(&f, "2025-06-02", "09:00", "10:00");
        f.ledger
            .create_session(
                &student_booking,
                BookingPolicy::EnforceAvailability,
                &f.student.account_id,
            )
            .await
            .unwrap();

        let remaining = f.availability.compute_available_slots(&psych, &monday).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].start_time.to_string(), "10:00");

        assert!(matches!(
            f.ledger
                .create_session(
                    &student_booking,
                    BookingPolicy::EnforceAvailability,
                    &f.student.account_id,
                )
                .await,
            Err(PortalError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_policies_differ_outside_published_slots() {
        let f = fixture().await;
        // No schedule at all: students cannot book, psychologists can
        let req = request(&f, "2025-06-02", "15:00", "16:00");
        assert!(matches!(
            f.ledger
                .create_session(&req, BookingPolicy::EnforceAvailability, &f.student.account_id)
                .await,
            Err(PortalError::Conflict(_))
        ));
        f.ledger
            .create_session(&req, BookingPolicy::OverlapOnly, &f.psychologist.account_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_bookings_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::create_pool(&dir.path().join("race.sqlite"), db::DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();

        let accounts = AccountManager::new(
            pool.clone(),
            Arc::new(ServerConfig::for_testing(dir.path().to_path_buf())),
        );
        let mut ids = Vec::new();
        for (email, role) in [("doc@uni.edu", Role::Psychologist), ("stu@uni.edu", Role::Student)] {
            ids.push(
                accounts
                    .create_account(NewAccount {
                        email: email.to_string(),
                        password: "password-1".to_string(),
                        role,
                        status: AccountStatus::Active,
                        created_by: None,
                    })
                    .await
                    .unwrap()
                    .id,
            );
        }

        let ledger = Arc::new(SessionLedger::new(pool.clone(), FixedOffset::east_opt(0).unwrap(), 60));
        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            let req = SessionRequest {
                student_id: Some(ids[1].clone()),
                psychologist_id: Some(ids[0].clone()),
                date: "2025-06-02".to_string(),
                start_time: Some(format!("09:{:02}", i * 5)),
                duration: Some(45),
                ..Default::default()
            };
            let creator = ids[0].clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .create_session(&req, BookingPolicy::OverlapOnly, &creator)
                    .await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(PortalError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        // Every request overlaps every other, so exactly one wins
        assert_eq!(created, 1);
        assert_no_overlaps(&pool).await;
    }

    fn clock(minutes: u16) -> ClockTime {
        ClockTime::from_minutes(minutes).unwrap()
    }

    fn arb_range() -> impl Strategy<Value = TimeRange> {
        (0u16..1439, 1u16..240).prop_map(|(start, len)| {
            let end = (start + len).min(1439);
            let start = start.min(end - 1);
            TimeRange::new(clock(start), clock(end)).unwrap()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_overlap_is_symmetric(a in arb_range(), b in arb_range()) {
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }

        #[test]
        fn prop_range_overlaps_itself(a in arb_range()) {
            prop_assert!(a.overlaps(&a));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_ledger_never_double_books(
            ops in prop::collection::vec((0u16..16, 1u32..4, any::<bool>()), 1..12)
        ) {
            tokio_test::block_on(async {
                let f = fixture().await;
                let mut booked: Vec<String> = Vec::new();

                for (slot, half_hours, reschedule) in ops {
                    let start = clock(6 * 60 + slot * 30);
                    let range = TimeRange::starting_at(start, half_hours * 30).unwrap();

                    if reschedule && !booked.is_empty() {
                        let target = &booked[usize::from(slot) % booked.len()];
                        let _ = f
                            .ledger
                            .reschedule(target, "2025-06-02", &start.to_string(), &f.admin)
                            .await;
                    } else {
                        let req = request(
                            &f,
                            "2025-06-02",
                            &range.start_time.to_string(),
                            &range.end_time.to_string(),
                        );
                        if let Ok(session) = f
                            .ledger
                            .create_session(&req, BookingPolicy::OverlapOnly, &f.admin.account_id)
                            .await
                        {
                            booked.push(session.id);
                        }
                    }

                    assert_no_overlaps(&f.pool).await;
                }
            });
        }
    }
}
