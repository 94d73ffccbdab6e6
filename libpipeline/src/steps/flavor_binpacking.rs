use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{PgPool, Row};

use crate::activation::MinMaxScale;
use crate::request::{NovaRequest, PipelineRequest};
use crate::step::{PipelineError, Step, StepResult, StepStatistics, decode_opts};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FlavorBinpackingOpts {
    /// Maps the number of additional instances of the requested flavor a
    /// host can take into the activation band.
    scale: MinMaxScale,
}

/// Packs instances of a flavor onto the hosts with the least remaining
/// space for that flavor, using the flavor host space feature table.
/// Requests without a flavor name are left unaffected.
#[derive(Default)]
pub struct FlavorBinpackingStep {
    db: Option<PgPool>,
    opts: Option<FlavorBinpackingOpts>,
}

#[async_trait]
impl Step<NovaRequest> for FlavorBinpackingStep {
    fn name(&self) -> &str {
        "flavor_binpacking"
    }

    fn triggers(&self) -> Vec<String> {
        vec![libbus::topics::features_updated("flavor_host_space")]
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), PipelineError> {
        let opts: FlavorBinpackingOpts = decode_opts("flavor_binpacking", &opts)?;
        opts.scale.validate()?;
        self.opts = Some(opts);
        self.db = Some(db);
        Ok(())
    }

    async fn run(&self, request: &NovaRequest) -> Result<StepResult, PipelineError> {
        let (db, opts) = match (&self.db, &self.opts) {
            (Some(db), Some(opts)) => (db, opts),
            _ => {
                return Err(PipelineError::StepRun {
                    step: "flavor_binpacking".into(),
                    source: anyhow::anyhow!("step not initialized"),
                });
            }
        };
        let Some(flavor) = request.flavor_name() else {
            log::debug!("flavor_binpacking: request has no flavor name, no effect");
            return Ok(StepResult::no_effect(&request.hosts()));
        };

        let rows = sqlx::query(
            "SELECT compute_host, fitting_instances \
             FROM feature_flavor_host_space WHERE flavor_name = $1",
        )
        .bind(&flavor)
        .fetch_all(db)
        .await?;

        let mut space: HashMap<String, f64> = HashMap::new();
        for row in rows {
            let host: String = row.try_get("compute_host")?;
            let fitting: i64 = row.try_get("fitting_instances")?;
            space.insert(host, fitting as f64);
        }

        let mut result = StepResult::no_effect(&request.hosts());
        for (host, activation) in result.activations.iter_mut() {
            if let Some(fitting) = space.get(host) {
                // Fewer remaining slots rank higher: pack before spreading.
                *activation = opts.scale.scale(-fitting);
            }
        }
        result.statistics.insert(
            "fitting instances".to_string(),
            StepStatistics {
                unit: "count".to_string(),
                hosts: space,
            },
        );
        Ok(result)
    }
}
