/// Application context and dependency injection
use crate::{
    account::AccountManager,
    admin::AdminPermissionManager,
    availability::AvailabilityManager,
    config::ServerConfig,
    db,
    enrollment::EnrollmentService,
    error::PortalResult,
    mailer::Mailer,
    messaging::{ConnectionRegistry, MessageStore},
    profile::ProfileRegistry,
    rate_limit::RateLimiter,
    reports::ReportService,
    scheduling::SessionLedger,
    seminars::SeminarRegistry,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub permission_manager: Arc<AdminPermissionManager>,
    pub profiles: Arc<ProfileRegistry>,
    // Scheduling
    pub availability: Arc<AvailabilityManager>,
    pub ledger: Arc<SessionLedger>,
    pub enrollment: Arc<EnrollmentService>,
    // Messaging
    pub connections: Arc<ConnectionRegistry>,
    pub messages: Arc<MessageStore>,
    pub seminars: Arc<SeminarRegistry>,
    pub reports: Arc<ReportService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: Arc<Mailer>,
    pub started_at: Instant,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> PortalResult<Self> {
        config.validate()?;

        if !config.storage.data_directory.exists() {
            tokio::fs::create_dir_all(&config.storage.data_directory).await?;
        }

        let pool = db::create_pool(
            &config.storage.database,
            db::DatabaseOptions {
                max_connections: config.storage.max_connections,
                ..Default::default()
            },
        )
        .await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let mailer = Mailer::new(config.email.clone())?;
        Ok(Self::with_pool(config, pool, mailer))
    }

    /// Wire every service over an existing, migrated pool
    pub fn with_pool(config: ServerConfig, pool: SqlitePool, mailer: Mailer) -> Self {
        let config = Arc::new(config);
        let tz = config.scheduling.timezone();
        let mailer = Arc::new(mailer);

        let account_manager = Arc::new(AccountManager::new(pool.clone(), config.clone()));
        let permission_manager = Arc::new(AdminPermissionManager::new(pool.clone()));
        let profiles = Arc::new(ProfileRegistry::with_sqlite(pool.clone()));

        let availability = Arc::new(AvailabilityManager::new(pool.clone(), tz));
        let ledger = Arc::new(SessionLedger::new(
            pool.clone(),
            tz,
            config.scheduling.default_session_minutes,
        ));
        let enrollment = Arc::new(EnrollmentService::new(
            pool.clone(),
            config.clone(),
            mailer.clone(),
        ));

        let connections = Arc::new(ConnectionRegistry::default());
        let messages = Arc::new(MessageStore::new(pool.clone(), connections.clone()));

        let seminars = Arc::new(SeminarRegistry::new(pool.clone(), tz));
        let reports = Arc::new(ReportService::new(pool.clone(), account_manager.clone(), tz));
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Self {
            config,
            db: pool,
            account_manager,
            permission_manager,
            profiles,
            availability,
            ledger,
            enrollment,
            connections,
            messages,
            seminars,
            reports,
            rate_limiter,
            mailer,
            started_at: Instant::now(),
        }
    }

    /// In-memory context for tests and local tooling
    pub async fn in_memory(config: ServerConfig) -> PortalResult<Self> {
        let pool = db::create_memory_pool().await?;
        Ok(Self::with_pool(config, pool, Mailer::disabled()))
    }

    /// Create the configured bootstrap admin if it does not exist yet
    pub async fn bootstrap(&self) -> PortalResult<()> {
        if let Some(bootstrap) = &self.config.bootstrap {
            if let Some(admin) = self.enrollment.bootstrap_admin(bootstrap).await? {
                tracing::info!("Created bootstrap admin {}", admin.email);
            }
        }
        Ok(())
    }

    pub fn service_url(&self) -> &str {
        &self.config.service.public_url
    }
}
