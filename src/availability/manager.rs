/// Availability persistence and slot computation
use super::{
    candidate_slots, subtract_booked, validate_exception, validate_schedule, Availability,
    AvailabilityException, AvailabilitySlot, DaySchedule, DayScheduleInput, ExceptionInput,
};
use crate::{
    calendar::{self, ClockTime, TimeRange},
    error::{PortalError, PortalResult},
};
use chrono::{FixedOffset, NaiveDate, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Availability manager
pub struct AvailabilityManager {
    db: SqlitePool,
    tz: FixedOffset,
}

impl AvailabilityManager {
    pub fn new(db: SqlitePool, tz: FixedOffset) -> Self {
        Self { db, tz }
    }

    pub fn timezone(&self) -> &FixedOffset {
        &self.tz
    }

    async fn ensure_psychologist(&self, psychologist_id: &str) -> PortalResult<()> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM account WHERE id = ?")
            .bind(psychologist_id)
            .fetch_optional(&self.db)
            .await?;

        match role.as_deref() {
            Some("psychologist") => Ok(()),
            _ => Err(PortalError::NotFound(format!(
                "Psychologist {} not found",
                psychologist_id
            ))),
        }
    }

    /// Recurring schedule and exceptions
    pub async fn get_availability(&self, psychologist_id: &str) -> PortalResult<Availability> {
        self.ensure_psychologist(psychologist_id).await?;

        let mut conn = self.db.acquire().await?;
        let schedule = load_schedule(&mut conn, psychologist_id).await?;
        let exceptions = load_exceptions(&mut conn, psychologist_id, None).await?;

        Ok(Availability {
            psychologist_id: psychologist_id.to_string(),
            schedule,
            exceptions,
        })
    }

    /// Replace the whole weekly schedule.
    ///
    /// Validation runs before anything is written and the replace happens in
    /// one transaction, so a bad slot leaves the stored schedule untouched.
    pub async fn update_schedule(
        &self,
        psychologist_id: &str,
        input: &[DayScheduleInput],
    ) -> PortalResult<Vec<DaySchedule>> {
        let schedule = validate_schedule(input)?;
        self.ensure_psychologist(psychologist_id).await?;

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM availability_slot WHERE psychologist_id = ?")
            .bind(psychologist_id)
            .execute(&mut *tx)
            .await?;

        for (day_position, day) in schedule.iter().enumerate() {
            if day.slots.is_empty() {
                // Keep the day entry so an explicitly empty day round-trips
                insert_slot_row(&mut *tx, psychologist_id, day.day_of_week, day_position, -1, None)
                    .await?;
                continue;
            }
            for (slot_position, slot) in day.slots.iter().enumerate() {
                insert_slot_row(
                    &mut *tx,
                    psychologist_id,
                    day.day_of_week,
                    day_position,
                    slot_position as i64,
                    Some(slot),
                )
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            "Availability schedule replaced for {} ({} days)",
            psychologist_id,
            schedule.len()
        );

        Ok(schedule)
    }

    /// Insert or replace the exception for a date
    pub async fn upsert_exception(
        &self,
        psychologist_id: &str,
        input: &ExceptionInput,
    ) -> PortalResult<AvailabilityException> {
        let exception = validate_exception(input, &self.tz)?;
        self.ensure_psychologist(psychologist_id).await?;

        let slots = serde_json::to_string(&exception.slots)
            .map_err(|e| PortalError::Internal(format!("Failed to encode slots: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO availability_exception (psychologist_id, date, is_available, slots, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (psychologist_id, date) DO UPDATE SET
                is_available = excluded.is_available,
                slots = excluded.slots,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(psychologist_id)
        .bind(calendar::format_date(&exception.date))
        .bind(exception.is_available)
        .bind(slots)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        tracing::info!(
            "Availability exception for {} on {} set (available: {})",
            psychologist_id,
            exception.date,
            exception.is_available
        );

        Ok(exception)
    }

    pub async fn remove_exception(&self, psychologist_id: &str, date: &str) -> PortalResult<()> {
        let date = calendar::parse_date(date, &self.tz)?;

        let result = sqlx::query(
            "DELETE FROM availability_exception WHERE psychologist_id = ? AND date = ?",
        )
        .bind(psychologist_id)
        .bind(calendar::format_date(&date))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::NotFound(format!(
                "No availability exception on {}",
                date
            )));
        }

        tracing::info!("Availability exception for {} on {} removed", psychologist_id, date);
        Ok(())
    }

    /// Bookable slots for a psychologist on a date
    pub async fn compute_available_slots(
        &self,
        psychologist_id: &str,
        date: &NaiveDate,
    ) -> PortalResult<Vec<AvailabilitySlot>> {
        self.ensure_psychologist(psychologist_id).await?;

        let mut conn = self.db.acquire().await?;
        let slots = slots_on(&mut conn, psychologist_id, date).await?;

        tracing::debug!(
            "{} free slots for {} on {} ({})",
            slots.len(),
            psychologist_id,
            date,
            calendar::day_name(calendar::day_of_week(date)).unwrap_or("?")
        );

        Ok(slots)
    }
}

/// Slot computation against an open connection
pub(crate) async fn slots_on(
    conn: &mut SqliteConnection,
    psychologist_id: &str,
    date: &NaiveDate,
) -> PortalResult<Vec<AvailabilitySlot>> {
    let schedule = load_schedule(conn, psychologist_id).await?;
    let exception = load_exceptions(conn, psychologist_id, Some(date))
        .await?
        .into_iter()
        .next();

    let candidates = candidate_slots(&schedule, exception.as_ref(), date);
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let booked = scheduled_ranges(conn, psychologist_id, date).await?;
    Ok(subtract_booked(candidates, &booked))
}

async fn insert_slot_row(
    conn: &mut SqliteConnection,
    psychologist_id: &str,
    day_of_week: u8,
    day_position: usize,
    slot_position: i64,
    slot: Option<&AvailabilitySlot>,
) -> PortalResult<()> {
    sqlx::query(
        r#"
        INSERT INTO availability_slot
            (psychologist_id, day_of_week, day_position, slot_position, start_time, end_time, is_available)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(psychologist_id)
    .bind(i64::from(day_of_week))
    .bind(day_position as i64)
    .bind(slot_position)
    .bind(slot.map(|s| s.start_time.to_string()).unwrap_or_default())
    .bind(slot.map(|s| s.end_time.to_string()).unwrap_or_default())
    .bind(slot.map(|s| s.is_available).unwrap_or(false))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn load_schedule(
    conn: &mut SqliteConnection,
    psychologist_id: &str,
) -> PortalResult<Vec<DaySchedule>> {
    let rows = sqlx::query(
        r#"
        SELECT day_of_week, day_position, slot_position, start_time, end_time, is_available
        FROM availability_slot
        WHERE psychologist_id = ?
        ORDER BY day_position, slot_position
        "#,
    )
    .bind(psychologist_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut schedule: Vec<DaySchedule> = Vec::new();
    let mut current_position: Option<i64> = None;

    for row in rows {
        let day_position: i64 = row.get("day_position");
        let day_of_week: i64 = row.get("day_of_week");

        if current_position != Some(day_position) {
            schedule.push(DaySchedule {
                day_of_week: day_of_week as u8,
                slots: Vec::new(),
            });
            current_position = Some(day_position);
        }

        let slot_position: i64 = row.get("slot_position");
        if slot_position < 0 {
            continue;
        }

        let start: String = row.get("start_time");
        let end: String = row.get("end_time");
        let slot = AvailabilitySlot {
            start_time: ClockTime::parse("startTime", &start)?,
            end_time: ClockTime::parse("endTime", &end)?,
            is_available: row.get("is_available"),
        };
        if let Some(day) = schedule.last_mut() {
            day.slots.push(slot);
        }
    }

    Ok(schedule)
}

async fn load_exceptions(
    conn: &mut SqliteConnection,
    psychologist_id: &str,
    date: Option<&NaiveDate>,
) -> PortalResult<Vec<AvailabilityException>> {
    let rows = sqlx::query(
        r#"
        SELECT date, is_available, slots
        FROM availability_exception
        WHERE psychologist_id = ? AND (? IS NULL OR date = ?)
        ORDER BY date
        "#,
    )
    .bind(psychologist_id)
    .bind(date.map(calendar::format_date))
    .bind(date.map(calendar::format_date))
    .fetch_all(&mut *conn)
    .await?;

    let mut exceptions = Vec::with_capacity(rows.len());
    for row in rows {
        let raw_date: String = row.get("date");
        let raw_slots: String = row.get("slots");
        exceptions.push(AvailabilityException {
            date: NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
                .map_err(|e| PortalError::Internal(format!("Stored date is invalid: {}", e)))?,
            is_available: row.get("is_available"),
            slots: serde_json::from_str(&raw_slots)
                .map_err(|e| PortalError::Internal(format!("Stored slots are invalid: {}", e)))?,
        });
    }

    Ok(exceptions)
}

/// Ranges held by scheduled sessions of a psychologist on a date
pub(crate) async fn scheduled_ranges(
    conn: &mut SqliteConnection,
    psychologist_id: &str,
    date: &NaiveDate,
) -> PortalResult<Vec<TimeRange>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT start_time, end_time FROM therapy_session
        WHERE psychologist_id = ? AND date = ? AND status = 'scheduled'
        "#,
    )
    .bind(psychologist_id)
    .bind(calendar::format_date(date))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|(start, end)| TimeRange::parse(start, end))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountManager, AccountStatus, NewAccount, Role};
    use crate::availability::SlotInput;
    use crate::config::ServerConfig;
    use crate::db;
    use std::sync::Arc;

    async fn setup() -> (SqlitePool, AvailabilityManager, String) {
        let pool = db::create_memory_pool().await.unwrap();
        let accounts = AccountManager::new(
            pool.clone(),
            Arc::new(ServerConfig::for_testing("/tmp/carepath-test".into())),
        );
        let psychologist = accounts
            .create_account(NewAccount {
                email: "doc@uni.edu".to_string(),
                password: "password-1".to_string(),
                role: Role::Psychologist,
                status: AccountStatus::Active,
                created_by: None,
            })
            .await
            .unwrap();

        let manager = AvailabilityManager::new(pool.clone(), FixedOffset::east_opt(0).unwrap());
        (pool, manager, psychologist.id)
    }

    fn monday_schedule() -> Vec<DayScheduleInput> {
        vec![DayScheduleInput {
            day_of_week: 1,
            slots: vec![
                SlotInput::new("09:00", "10:00"),
                SlotInput::new("10:00", "11:00"),
            ],
        }]
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    #[tokio::test]
    async fn test_schedule_round_trip_and_slots() {
        let (_, manager, psych) = setup().await;
        manager.update_schedule(&psych, &monday_schedule()).await.unwrap();

        let availability = manager.get_availability(&psych).await.unwrap();
        assert_eq!(availability.schedule.len(), 1);
        assert_eq!(availability.schedule[0].slots.len(), 2);

        let first = manager.compute_available_slots(&psych, &monday()).await.unwrap();
        let second = manager.compute_available_slots(&psych, &monday()).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_inverted_slot_leaves_schedule_unchanged() {
        let (_, manager, psych) = setup().await;
        manager.update_schedule(&psych, &monday_schedule()).await.unwrap();

        let bad = vec![DayScheduleInput {
            day_of_week: 2,
            slots: vec![SlotInput::new("10:00", "09:00")],
        }];
        let err = manager.update_schedule(&psych, &bad).await.unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));

        let availability = manager.get_availability(&psych).await.unwrap();
        assert_eq!(availability.schedule[0].day_of_week, 1);
        assert_eq!(availability.schedule[0].slots.len(), 2);
    }

    #[tokio::test]
    async fn test_full_day_exception_blocks_date() {
        let (_, manager, psych) = setup().await;
        manager.update_schedule(&psych, &monday_schedule()).await.unwrap();

        manager
            .upsert_exception(
                &psych,
                &ExceptionInput {
                    date: "2025-06-02".to_string(),
                    is_available: false,
                    slots: vec![],
                },
            )
            .await
            .unwrap();

        assert!(manager
            .compute_available_slots(&psych, &monday())
            .await
            .unwrap()
            .is_empty());

        // The following Monday still uses the recurring schedule
        let next = NaiveDate::from_ymd_opt(2025, 6, 9).unwrap();
        assert_eq!(
            manager.compute_available_slots(&psych, &next).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_exception_upsert_replaces_entry() {
        let (_, manager, psych) = setup().await;

        for (available, slots) in [
            (false, vec![]),
            (true, vec![SlotInput::new("13:00", "14:00")]),
        ] {
            manager
                .upsert_exception(
                    &psych,
                    &ExceptionInput {
                        date: "2025-06-02T10:00:00Z".to_string(),
                        is_available: available,
                        slots,
                    },
                )
                .await
                .unwrap();
        }

        let availability = manager.get_availability(&psych).await.unwrap();
        assert_eq!(availability.exceptions.len(), 1);
        assert!(availability.exceptions[0].is_available);

        let slots = manager.compute_available_slots(&psych, &monday()).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start_time.to_string(), "13:00");

        manager.remove_exception(&psych, "2025-06-02").await.unwrap();
        assert!(matches!(
            manager.remove_exception(&psych, "2025-06-02").await,
            Err(PortalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_psychologist() {
        let (_, manager, _) = setup().await;
        assert!(matches!(
            manager.compute_available_slots("nobody", &monday()).await,
            Err(PortalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_scheduled_session_removes_slot() {
        let (pool, manager, psych) = setup().await;
        manager.update_schedule(&psych, &monday_schedule()).await.unwrap();

        sqlx::query(
            r#"
            INSERT INTO therapy_session (id, psychologist_id, student_id, date, start_time, end_time,
                duration_minutes, session_type, status, created_by, created_at, updated_at)
            VALUES ('s1', ?, ?, '2025-06-02', '09:00', '10:00', 60, 'individual', 'scheduled', ?, ?, ?)
            "#,
        )
        .bind(&psych)
        .bind(&psych)
        .bind(&psych)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        let slots = manager.compute_available_slots(&psych, &monday()).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start_time.to_string(), "10:00");
    }
}
