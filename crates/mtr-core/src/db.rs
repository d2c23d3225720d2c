use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

pub type DbPool = Pool<Postgres>;

/// Opens the scale database. A single connection is enough: the robot runs one query.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    info!(host = %config.host, database = %config.name, "scale database connected");
    Ok(pool)
}
