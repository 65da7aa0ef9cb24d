/// CarePath portal server entry point
use anyhow::Context;
use carepath::{error, jobs, server, AppContext, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before logging so the level and format apply
    let config = ServerConfig::from_env().context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("carepath={},tower_http=debug", config.logging.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    print_banner();

    error::set_expose_internal_details(config.service.development);

    let ctx = AppContext::new(config)
        .await
        .context("Failed to initialize application context")?;

    ctx.bootstrap().await?;

    let ctx = Arc::new(ctx);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
   ____                ____        _   _
  / ___|__ _ _ __ ___ |  _ \ __ _| |_| |__
 | |   / _` | '__/ _ \| |_) / _` | __| '_ \
 | |__| (_| | | |  __/|  __/ (_| | |_| | | |
  \____\__,_|_|  \___||_|   \__,_|\__|_| |_|

        Student mental-health portal v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
