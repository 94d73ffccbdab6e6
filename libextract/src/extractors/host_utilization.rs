use async_trait::async_trait;
use libbus::topics;
use serde::Deserialize;
use sqlx::PgPool;

use crate::extractor::{ExtractError, FeatureExtractor, decode_opts};
use crate::store::ensure_table;

const TABLE: &str = "feature_host_utilization";

const DDL: &str = "CREATE TABLE IF NOT EXISTS feature_host_utilization (\
     compute_host TEXT PRIMARY KEY, \
     avg_cpu_usage_pct DOUBLE PRECISION NOT NULL, \
     avg_ram_usage_pct DOUBLE PRECISION NOT NULL, \
     free_vcpus BIGINT NOT NULL, \
     free_ram_mb BIGINT NOT NULL)";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HostUtilizationOpts {
    /// Hosts above this CPU usage are reported at 100% to keep weighers
    /// away from overloaded hypervisors.
    #[serde(default = "default_saturation_pct")]
    saturation_pct: f64,
}

fn default_saturation_pct() -> f64 {
    95.0
}

impl Default for HostUtilizationOpts {
    fn default() -> Self {
        Self {
            saturation_pct: default_saturation_pct(),
        }
    }
}

/// Derives per-host utilization from the synced hypervisor table.
/// Whole-replace.
#[derive(Default)]
pub struct HostUtilizationExtractor {
    db: Option<PgPool>,
    opts: HostUtilizationOpts,
}

#[async_trait]
impl FeatureExtractor for HostUtilizationExtractor {
    fn name(&self) -> &str {
        "host_utilization"
    }

    fn table(&self) -> &str {
        TABLE
    }

    fn triggers(&self) -> Vec<String> {
        vec![topics::NOVA_HYPERVISORS_SYNCED.to_string()]
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), ExtractError> {
        self.opts = decode_opts("host_utilization", &opts)?;
        ensure_table(&db, DDL).await?;
        self.db = Some(db);
        Ok(())
    }

    async fn extract(&self) -> Result<u64, ExtractError> {
        let db = self.db.as_ref().ok_or_else(|| ExtractError::InvalidOptions {
            extractor: "host_utilization".into(),
            reason: "extractor not initialized".into(),
        })?;
        let mut tx = db.begin().await?;
        sqlx::query("DELETE FROM feature_host_utilization")
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            "INSERT INTO feature_host_utilization \
               (compute_host, avg_cpu_usage_pct, avg_ram_usage_pct, free_vcpus, free_ram_mb) \
             SELECT service_host, \
                    LEAST(100.0 * vcpus_used / NULLIF(vcpus, 0), $1), \
                    LEAST(100.0 * memory_mb_used / NULLIF(memory_mb, 0), $1), \
                    GREATEST(vcpus - vcpus_used, 0), \
                    GREATEST(memory_mb - memory_mb_used, 0) \
             FROM openstack_hypervisors",
        )
        .bind(self.opts.saturation_pct)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(inserted)
    }
}
