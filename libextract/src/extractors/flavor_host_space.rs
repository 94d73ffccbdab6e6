use async_trait::async_trait;
use libbus::topics;
use sqlx::PgPool;

use crate::extractor::{ExtractError, FeatureExtractor, decode_opts};
use crate::store::ensure_table;

const TABLE: &str = "feature_flavor_host_space";

const DDL: &str = "CREATE TABLE IF NOT EXISTS feature_flavor_host_space (\
     flavor_name TEXT NOT NULL, \
     compute_host TEXT NOT NULL, \
     fitting_instances BIGINT NOT NULL, \
     PRIMARY KEY (flavor_name, compute_host))";

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct FlavorHostSpaceOpts {}

/// Computes, per flavor and host, how many additional instances of the
/// flavor still fit into the host's free capacity. Depends on the host
/// utilization feature. Whole-replace.
#[derive(Default)]
pub struct FlavorHostSpaceExtractor {
    db: Option<PgPool>,
}

#[async_trait]
impl FeatureExtractor for FlavorHostSpaceExtractor {
    fn name(&self) -> &str {
        "flavor_host_space"
    }

    fn table(&self) -> &str {
        TABLE
    }

    fn triggers(&self) -> Vec<String> {
        vec![topics::NOVA_FLAVORS_SYNCED.to_string()]
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["host_utilization".to_string()]
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), ExtractError> {
        decode_opts::<FlavorHostSpaceOpts>("flavor_host_space", &opts)?;
        ensure_table(&db, DDL).await?;
        self.db = Some(db);
        Ok(())
    }

    async fn extract(&self) -> Result<u64, ExtractError> {
        let db = self.db.as_ref().ok_or_else(|| ExtractError::InvalidOptions {
            extractor: "flavor_host_space".into(),
            reason: "extractor not initialized".into(),
        })?;
        let mut tx = db.begin().await?;
        sqlx::query("DELETE FROM feature_flavor_host_space")
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            "INSERT INTO feature_flavor_host_space \
               (flavor_name, compute_host, fitting_instances) \
             SELECT f.name, u.compute_host, \
                    LEAST(u.free_vcpus / NULLIF(f.vcpus, 0), \
                          u.free_ram_mb / NULLIF(f.ram_mb, 0)) \
             FROM openstack_flavors f \
             CROSS JOIN feature_host_utilization u",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(inserted)
    }
}
