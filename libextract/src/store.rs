//! Feature store helpers.
//!
//! Feature table schemas are owned by their producing extractors; this
//! module only carries the shared pieces: table bootstrap and the
//! changes-since watermark used by delta-syncing extractors.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

const WATERMARK_DDL: &str = "CREATE TABLE IF NOT EXISTS sync_watermark (\
     name TEXT PRIMARY KEY, \
     time TIMESTAMPTZ NOT NULL)";

pub async fn ensure_table(db: &PgPool, ddl: &str) -> Result<(), sqlx::Error> {
    sqlx::query(ddl).execute(db).await?;
    Ok(())
}

pub async fn ensure_watermark_table(db: &PgPool) -> Result<(), sqlx::Error> {
    ensure_table(db, WATERMARK_DDL).await
}

/// The last sync watermark recorded under `name`, if any.
pub async fn watermark(db: &PgPool, name: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let row = sqlx::query("SELECT time FROM sync_watermark WHERE name = $1")
        .bind(name)
        .fetch_optional(db)
        .await?;
    row.map(|r| r.try_get("time")).transpose()
}

pub async fn set_watermark(
    db: &PgPool,
    name: &str,
    time: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sync_watermark (name, time) VALUES ($1, $2) \
         ON CONFLICT (name) DO UPDATE SET time = EXCLUDED.time",
    )
    .bind(name)
    .bind(time)
    .execute(db)
    .await?;
    Ok(())
}
