use async_trait::async_trait;
use libbus::topics;
use serde::Deserialize;
use sqlx::PgPool;

use crate::extractor::{ExtractError, FeatureExtractor, decode_opts};
use crate::store::ensure_table;

const TABLE: &str = "feature_host_capabilities";

const DDL: &str = "CREATE TABLE IF NOT EXISTS feature_host_capabilities (\
     compute_host TEXT PRIMARY KEY, \
     hypervisor_type TEXT NOT NULL, \
     traits TEXT NOT NULL)";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct HostCapabilitiesOpts {
    /// Aggregate names to leave out of the trait list.
    excluded_aggregates: Vec<String>,
}

/// Derives per-host capabilities (hypervisor type and traits) from the
/// synced hypervisor and aggregate tables. Whole-replace.
#[derive(Default)]
pub struct HostCapabilitiesExtractor {
    db: Option<PgPool>,
    opts: HostCapabilitiesOpts,
}

#[async_trait]
impl FeatureExtractor for HostCapabilitiesExtractor {
    fn name(&self) -> &str {
        "host_capabilities"
    }

    fn table(&self) -> &str {
        TABLE
    }

    fn triggers(&self) -> Vec<String> {
        vec![
            topics::NOVA_HYPERVISORS_SYNCED.to_string(),
            topics::NOVA_AGGREGATES_SYNCED.to_string(),
        ]
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), ExtractError> {
        self.opts = decode_opts("host_capabilities", &opts)?;
        ensure_table(&db, DDL).await?;
        self.db = Some(db);
        Ok(())
    }

    async fn extract(&self) -> Result<u64, ExtractError> {
        let db = self.db.as_ref().ok_or_else(|| ExtractError::InvalidOptions {
            extractor: "host_capabilities".into(),
            reason: "extractor not initialized".into(),
        })?;
        let mut tx = db.begin().await?;
        sqlx::query("DELETE FROM feature_host_capabilities")
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            "INSERT INTO feature_host_capabilities (compute_host, hypervisor_type, traits) \
             SELECT h.service_host, h.hypervisor_type, \
                    COALESCE(string_agg(a.name, ',' ORDER BY a.name), '') \
             FROM openstack_hypervisors h \
             LEFT JOIN openstack_aggregates a \
               ON a.compute_host = h.service_host AND a.name <> ALL($1) \
             GROUP BY h.service_host, h.hypervisor_type",
        )
        .bind(&self.opts.excluded_aggregates)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(inserted)
    }
}
