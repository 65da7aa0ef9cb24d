/// Seminar registry
///
/// Catalog of scheduled group events. Admins manage entries; every
/// authenticated account can browse them.
use crate::{
    account::{Actor, Role},
    calendar::{self, ClockTime, TimeRange},
    error::{PortalError, PortalResult},
};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;
use validator::Validate;

const SEMINAR_COLUMNS: &str =
    "id, title, description, date, start_time, end_time, location, capacity, created_by, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seminar {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub location: Option<String>,
    pub capacity: Option<i64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /seminars` and `PUT /seminars/:id`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SeminarInput {
    #[validate(length(min = 1, max = 200, message = "Title is required"))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub location: Option<String>,
    #[validate(range(min = 1, message = "Capacity must be positive"))]
    pub capacity: Option<i64>,
}

/// Seminar registry service
pub struct SeminarRegistry {
    db: SqlitePool,
    tz: FixedOffset,
}

impl SeminarRegistry {
    pub fn new(db: SqlitePool, tz: FixedOffset) -> Self {
        Self { db, tz }
    }

    fn check_input(&self, input: &SeminarInput) -> PortalResult<(NaiveDate, TimeRange)> {
        input
            .validate()
            .map_err(|e| PortalError::Validation(e.to_string()))?;
        let date = calendar::parse_date(&input.date, &self.tz)?;
        let range = TimeRange::parse(&input.start_time, &input.end_time)?;
        Ok((date, range))
    }

    fn require_admin(actor: &Actor) -> PortalResult<()> {
        if actor.is(Role::Admin) {
            Ok(())
        } else {
            Err(PortalError::Forbidden(
                "Only admins can manage seminars".to_string(),
            ))
        }
    }

    pub async fn create(&self, actor: &Actor, input: SeminarInput) -> PortalResult<Seminar> {
        Self::require_admin(actor)?;
        let (date, range) = self.check_input(&input)?;
        let now = Utc::now();

        let seminar = Seminar {
            id: Uuid::new_v4().to_string(),
            title: input.title.trim().to_string(),
            description: input.description,
            date,
            start_time: range.start_time,
            end_time: range.end_time,
            location: input.location,
            capacity: input.capacity,
            created_by: actor.account_id.clone(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO seminar (id, title, description, date, start_time, end_time, location, capacity, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&seminar.id)
        .bind(&seminar.title)
        .bind(&seminar.description)
        .bind(calendar::format_date(&seminar.date))
        .bind(seminar.start_time.to_string())
        .bind(seminar.end_time.to_string())
        .bind(&seminar.location)
        .bind(seminar.capacity)
        .bind(&seminar.created_by)
        .bind(seminar.created_at)
        .bind(seminar.updated_at)
        .execute(&self.db)
        .await?;

        tracing::info!("Seminar {} created by {}", seminar.id, actor.account_id);
        Ok(seminar)
    }

    pub async fn get(&self, id: &str) -> PortalResult<Seminar> {
        let query = format!("SELECT {} FROM seminar WHERE id = ?", SEMINAR_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("Seminar {} not found", id)))?;

        seminar_from_row(&row)
    }

    /// Seminars that have not finished yet, soonest first
    pub async fn list_upcoming(&self) -> PortalResult<Vec<Seminar>> {
        let (today, now) = calendar::local_now(&self.tz);
        let query = format!(
            r#"
            SELECT {} FROM seminar
            WHERE date > ?1 OR (date = ?1 AND end_time > ?2)
            ORDER BY date ASC, start_time ASC
            "#,
            SEMINAR_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(calendar::format_date(&today))
            .bind(now.to_string())
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(seminar_from_row).collect()
    }

    pub async fn update(&self, actor: &Actor, id: &str, input: SeminarInput) -> PortalResult<Seminar> {
        Self::require_admin(actor)?;
        let (date, range) = self.check_input(&input)?;

        let result = sqlx::query(
            r#"
            UPDATE seminar
            SET title = ?, description = ?, date = ?, start_time = ?, end_time = ?,
                location = ?, capacity = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(input.title.trim())
        .bind(&input.description)
        .bind(calendar::format_date(&date))
        .bind(range.start_time.to_string())
        .bind(range.end_time.to_string())
        .bind(&input.location)
        .bind(input.capacity)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::NotFound(format!("Seminar {} not found", id)));
        }

        tracing::info!("Seminar {} updated by {}", id, actor.account_id);
        self.get(id).await
    }

    pub async fn delete(&self, actor: &Actor, id: &str) -> PortalResult<()> {
        Self::require_admin(actor)?;

        let result = sqlx::query("DELETE FROM seminar WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PortalError::NotFound(format!("Seminar {} not found", id)));
        }

        tracing::info!("Seminar {} deleted by {}", id, actor.account_id);
        Ok(())
    }
}

fn seminar_from_row(row: &SqliteRow) -> PortalResult<Seminar> {
    let date: String = row.get("date");
    let start: String = row.get("start_time");
    let end: String = row.get("end_time");

    Ok(Seminar {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| PortalError::Internal(format!("Stored seminar date is invalid: {}", e)))?,
        start_time: ClockTime::parse("startTime", &start)?,
        end_time: ClockTime::parse("endTime", &end)?,
        location: row.get("location"),
        capacity: row.get("capacity"),
        created_by: row.get("created_by"),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
