//! Database migration command.
//!
//! Loads `DATABASE_URL` from the environment (or a `.env` file), connects,
//! and runs the migrations embedded in the commerce crate.

use streetline_commerce::config::{CommerceConfig, ConfigError};
use streetline_commerce::store::postgres;

/// Errors that can occur while migrating.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run all pending database migrations.
///
/// # Errors
///
/// Returns [`MigrationError`] if configuration is missing, the database is
/// unreachable, or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let config = CommerceConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = postgres::create_pool(&config.database_url).await?;

    tracing::info!("Running migrations...");
    postgres::run_migrations(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
