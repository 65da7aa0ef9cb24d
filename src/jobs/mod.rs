/// Background maintenance jobs
use crate::{context::AppContext, error::PortalResult, metrics};
use std::{future::Future, sync::Arc, time::Instant};
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::expired_session_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::lockout_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Purge expired and revoked auth sessions (runs every hour)
    async fn expired_session_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            info!("Running expired session cleanup");

            match timed("session_cleanup", tasks::cleanup_expired_sessions(&scheduler.context)).await {
                Ok(count) if count > 0 => info!("Removed {} expired auth sessions", count),
                Ok(_) => info!("Session cleanup: no expired sessions found"),
                Err(e) => error!("Failed to cleanup expired sessions: {}", e),
            }
        }
    }

    /// Clear lapsed login lockouts (runs every 15 minutes)
    async fn lockout_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(900));

        loop {
            interval.tick().await;

            match timed("lockout_cleanup", tasks::clear_expired_lockouts(&scheduler.context)).await {
                Ok(count) if count > 0 => info!("Cleared {} expired lockouts", count),
                Ok(_) => {}
                Err(e) => error!("Failed to clear expired lockouts: {}", e),
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if let Err(e) = timed("health_check", tasks::health_check(&scheduler.context)).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}

/// Run one job iteration and record its outcome
async fn timed<T, F>(job_type: &str, job: F) -> PortalResult<T>
where
    F: Future<Output = PortalResult<T>>,
{
    let start = Instant::now();
    let result = job.await;
    let status = if result.is_ok() { "success" } else { "failure" };
    metrics::record_background_job(job_type, status, start.elapsed().as_secs_f64());
    result
}
