use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libbus::topics;
use sqlx::{PgPool, Row};

use crate::extractor::{ExtractError, FeatureExtractor, decode_opts};
use crate::store::{ensure_table, ensure_watermark_table, set_watermark, watermark};

const TABLE: &str = "feature_recently_deleted_servers";

const DDL: &str = "CREATE TABLE IF NOT EXISTS feature_recently_deleted_servers (\
     id TEXT PRIMARY KEY, \
     deleted_at TIMESTAMPTZ NOT NULL)";

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct DeletedServersOpts {}

/// Tracks recently deleted servers with a changes-since watermark: each run
/// upserts only the deletions newer than the last run, so repeated runs
/// over unchanged inputs are no-ops.
#[derive(Default)]
pub struct DeletedServersExtractor {
    db: Option<PgPool>,
}

#[async_trait]
impl FeatureExtractor for DeletedServersExtractor {
    fn name(&self) -> &str {
        "deleted_servers"
    }

    fn table(&self) -> &str {
        TABLE
    }

    fn triggers(&self) -> Vec<String> {
        vec![topics::NOVA_DELETED_SERVERS_SYNCED.to_string()]
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), ExtractError> {
        decode_opts::<DeletedServersOpts>("deleted_servers", &opts)?;
        ensure_table(&db, DDL).await?;
        ensure_watermark_table(&db).await?;
        self.db = Some(db);
        Ok(())
    }

    async fn extract(&self) -> Result<u64, ExtractError> {
        let db = self.db.as_ref().ok_or_else(|| ExtractError::InvalidOptions {
            extractor: "deleted_servers".into(),
            reason: "extractor not initialized".into(),
        })?;
        let since = watermark(db, "deleted_servers").await?;

        let mut tx = db.begin().await?;
        let upserted = sqlx::query(
            "INSERT INTO feature_recently_deleted_servers (id, deleted_at) \
             SELECT id, deleted_at FROM openstack_servers_deleted \
             WHERE deleted_at > COALESCE($1, 'epoch'::timestamptz) \
             ON CONFLICT (id) DO UPDATE SET deleted_at = EXCLUDED.deleted_at",
        )
        .bind(since)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let newest: Option<DateTime<Utc>> =
            sqlx::query("SELECT MAX(deleted_at) AS newest FROM openstack_servers_deleted")
                .fetch_one(&mut *tx)
                .await?
                .try_get("newest")?;
        tx.commit().await?;

        if let Some(newest) = newest {
            set_watermark(db, "deleted_servers", newest).await?;
        }
        Ok(upserted)
    }
}
