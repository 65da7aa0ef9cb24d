/// Aggregate reporting for admins
use crate::{
    account::{AccountManager, AccountStatus, Role},
    calendar,
    error::{PortalError, PortalResult},
};
use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Query string of `GET /admin/reports/sessions`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PsychologistLoad {
    pub psychologist_id: String,
    pub sessions: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
    pub by_psychologist: Vec<PsychologistLoad>,
    pub average_rating: Option<f64>,
    pub rated_sessions: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCount {
    pub role: Role,
    pub status: AccountStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalStats {
    pub accounts: Vec<AccountCount>,
    pub total_accounts: i64,
    pub scheduled_sessions: i64,
    pub seminars: i64,
    pub messages: i64,
}

pub struct ReportService {
    db: SqlitePool,
    accounts: Arc<AccountManager>,
    tz: FixedOffset,
}

impl ReportService {
    pub fn new(db: SqlitePool, accounts: Arc<AccountManager>, tz: FixedOffset) -> Self {
        Self { db, accounts, tz }
    }

    fn resolve_range(&self, range: &ReportRange) -> PortalResult<(Option<NaiveDate>, Option<NaiveDate>)> {
        let from = range
            .from
            .as_deref()
            .map(|d| calendar::parse_date(d, &self.tz))
            .transpose()?;
        let to = range
            .to
            .as_deref()
            .map(|d| calendar::parse_date(d, &self.tz))
            .transpose()?;

        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(PortalError::Validation(
                    "Report start date must not be after end date".to_string(),
                ));
            }
        }
        Ok((from, to))
    }

    /// Session totals over an inclusive date range; open ends are unbounded
    pub async fn session_summary(&self, range: &ReportRange) -> PortalResult<SessionSummary> {
        let (from, to) = self.resolve_range(range)?;
        let lower = from.map(|d| calendar::format_date(&d)).unwrap_or_default();
        let upper = to
            .map(|d| calendar::format_date(&d))
            .unwrap_or_else(|| "9999-12-31".to_string());

        let mut by_status = BTreeMap::new();
        let mut total = 0;
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM therapy_session WHERE date >= ? AND date <= ? GROUP BY status",
        )
        .bind(&lower)
        .bind(&upper)
        .fetch_all(&self.db)
        .await?;
        for row in rows {
            let count: i64 = row.get("n");
            total += count;
            by_status.insert(row.get("status"), count);
        }

        let mut by_type = BTreeMap::new();
        let rows = sqlx::query(
            "SELECT session_type, COUNT(*) AS n FROM therapy_session WHERE date >= ? AND date <= ? GROUP BY session_type",
        )
        .bind(&lower)
        .bind(&upper)
        .fetch_all(&self.db)
        .await?;
        for row in rows {
            by_type.insert(row.get("session_type"), row.get("n"));
        }

        let by_psychologist = sqlx::query(
            r#"
            SELECT psychologist_id,
                   COUNT(*) AS sessions,
                   SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed
            FROM therapy_session
            WHERE date >= ? AND date <= ?
            GROUP BY psychologist_id
            ORDER BY sessions DESC, psychologist_id ASC
            "#,
        )
        .bind(&lower)
        .bind(&upper)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(|row| PsychologistLoad {
            psychologist_id: row.get("psychologist_id"),
            sessions: row.get("sessions"),
            completed: row.get("completed"),
        })
        .collect();

        let rating = sqlx::query(
            r#"
            SELECT AVG(feedback_rating) AS average, COUNT(feedback_rating) AS rated
            FROM therapy_session
            WHERE date >= ? AND date <= ? AND feedback_rating IS NOT NULL
            "#,
        )
        .bind(&lower)
        .bind(&upper)
        .fetch_one(&self.db)
        .await?;

        Ok(SessionSummary {
            from,
            to,
            total,
            by_status,
            by_type,
            by_psychologist,
            average_rating: rating.get("average"),
            rated_sessions: rating.get("rated"),
        })
    }

    /// Dashboard counters
    pub async fn portal_stats(&self) -> PortalResult<PortalStats> {
        let accounts: Vec<AccountCount> = self
            .accounts
            .count_by_role_and_status()
            .await?
            .into_iter()
            .map(|(role, status, count)| AccountCount { role, status, count })
            .collect();
        let total_accounts = accounts.iter().map(|c| c.count).sum();

        let scheduled_sessions =
            sqlx::query_scalar("SELECT COUNT(*) FROM therapy_session WHERE status = 'scheduled'")
                .fetch_one(&self.db)
                .await?;
        let seminars = sqlx::query_scalar("SELECT COUNT(*) FROM seminar")
            .fetch_one(&self.db)
            .await?;
        let messages = sqlx::query_scalar("SELECT COUNT(*) FROM message")
            .fetch_one(&self.db)
            .await?;

        Ok(PortalStats {
            accounts,
            total_accounts,
            scheduled_sessions,
            seminars,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Actor, NewAccount};
    use crate::config::ServerConfig;
    use crate::db;
    use crate::scheduling::{BookingPolicy, Feedback, SessionLedger, SessionRequest};

    struct Fixture {
        reports: ReportService,
        ledger: SessionLedger,
        psychologist: Actor,
        student: Actor,
    }

    async fn fixture() -> Fixture {
        let pool = db::create_memory_pool().await.unwrap();
        let accounts = Arc::new(AccountManager::new(
            pool.clone(),
            Arc::new(ServerConfig::for_testing("/tmp/carepath-test".into())),
        ));

        let mut actors = Vec::new();
        for (email, role) in [
            ("doc@uni.edu", Role::Psychologist),
            ("stu@uni.edu", Role::Student),
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
            actors.push(Actor::new(account.id, role));
        }
        let student = actors.pop().unwrap();
        let psychologist = actors.pop().unwrap();

        let utc = FixedOffset::east_opt(0).unwrap();
        Fixture {
            reports: ReportService::new(pool.clone(), accounts, utc),
            ledger: SessionLedger::new(pool, utc, 60),
            psychologist,
            student,
        }
    }

    async fn book(f: &Fixture, date: &str, start: &str) -> String {
        let request = SessionRequest {
            student_id: Some(f.student.account_id.clone()),
            psychologist_id: Some(f.psychologist.account_id.clone()),
            date: date.to_string(),
            start_time: Some(start.to_string()),
            ..Default::default()
        };
        f.ledger
            .create_session(&request, BookingPolicy::OverlapOnly, &f.psychologist.account_id)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_session_summary_counts() {
        let f = fixture().await;
        let first = book(&f, "2025-03-03", "09:00").await;
        let second = book(&f, "2025-03-04", "09:00").await;
        book(&f, "2025-04-01", "09:00").await;

        f.ledger
            .update_status(&first, "completed", &f.psychologist)
            .await
            .unwrap();
        f.ledger
            .submit_feedback(
                &first,
                &Feedback {
                    rating: 4,
                    comments: None,
                },
                &f.student,
            )
            .await
            .unwrap();
        f.ledger
            .cancel(&second, Some("ill".to_string()), &f.student)
            .await
            .unwrap();

        let all = f.reports.session_summary(&ReportRange::default()).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.by_status.get("scheduled"), Some(&1));
        assert_eq!(all.by_status.get("completed"), Some(&1));
        assert_eq!(all.by_status.get("cancelled"), Some(&1));
        assert_eq!(all.by_type.get("individual"), Some(&3));
        assert_eq!(all.by_psychologist.len(), 1);
        assert_eq!(all.by_psychologist[0].completed, 1);
        assert_eq!(all.average_rating, Some(4.0));
        assert_eq!(all.rated_sessions, 1);

        let march = f
            .reports
            .session_summary(&ReportRange {
                from: Some("2025-03-01".to_string()),
                to: Some("2025-03-31".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(march.total, 2);
    }

    #[tokio::test]
    async fn test_inverted_range_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.reports
                .session_summary(&ReportRange {
                    from: Some("2025-04-01".to_string()),
                    to: Some("2025-03-01".to_string()),
                })
                .await,
            Err(PortalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_summary_has_no_average() {
        let f = fixture().await;
        let summary = f.reports.session_summary(&ReportRange::default()).await.unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.average_rating, None);
    }

    #[tokio::test]
    async fn test_portal_stats() {
        let f = fixture().await;
        book(&f, "2030-01-07", "10:00").await;

        let stats = f.reports.portal_stats().await.unwrap();
        assert_eq!(stats.total_accounts, 2);
        assert_eq!(stats.scheduled_sessions, 1);
        assert_eq!(stats.seminars, 0);
        assert!(stats
            .accounts
            .iter()
            .any(|c| c.role == Role::Student && c.status == AccountStatus::Active && c.count == 1));
    }
}
