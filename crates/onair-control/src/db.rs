//! Database connection pool and migrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to PostgreSQL with a bounded retry window — the store is a hard
/// startup dependency, but it may come up after us.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let mut last_err = None;
    for attempt in 1..=30 {
        match PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                tracing::info!("connected to PostgreSQL");
                return Ok(pool);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "waiting for database");
                last_err = Some(e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
    Err(anyhow::anyhow!(
        "database connection failed: {}",
        last_err.expect("at least one attempt")
    ))
}

/// Run embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations complete");
    Ok(())
}
