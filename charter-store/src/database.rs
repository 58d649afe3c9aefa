use charter_core::CoreError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

/// Exclusion-constraint violation raised by `no_overlapping_bookings`.
pub(crate) const EXCLUSION_VIOLATION: &str = "23P01";

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Pool exhaustion and I/O failures are retryable; anything else is a bug.
pub(crate) fn db_error(e: sqlx::Error) -> CoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
            CoreError::Upstream(format!("database unavailable: {e}"))
        }
        other => CoreError::Internal(format!("database error: {other}")),
    }
}

pub(crate) fn is_exclusion_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(EXCLUSION_VIOLATION),
        _ => false,
    }
}
