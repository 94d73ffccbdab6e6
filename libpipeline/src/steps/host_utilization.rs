use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{PgPool, Row};

use crate::activation::{MinMaxScale, no_effect};
use crate::request::{NovaRequest, PipelineRequest};
use crate::step::{PipelineError, Step, StepResult, StepStatistics, decode_opts};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostUtilizationOpts {
    /// Maps free CPU percentage into the activation band.
    scale: MinMaxScale,
}

/// Weighs hosts by their free CPU capacity from the host utilization
/// feature table. Hosts without a feature row keep the no-effect
/// activation.
#[derive(Default)]
pub struct HostUtilizationStep {
    db: Option<PgPool>,
    opts: Option<HostUtilizationOpts>,
}

#[async_trait]
impl Step<NovaRequest> for HostUtilizationStep {
    fn name(&self) -> &str {
        "host_utilization"
    }

    fn triggers(&self) -> Vec<String> {
        vec![libbus::topics::features_updated("host_utilization")]
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), PipelineError> {
        let opts: HostUtilizationOpts = decode_opts("host_utilization", &opts)?;
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
                    step: "host_utilization".into(),
                    source: anyhow::anyhow!("step not initialized"),
                });
            }
        };

        let rows = sqlx::query(
            "SELECT compute_host, avg_cpu_usage_pct, avg_ram_usage_pct \
             FROM feature_host_utilization",
        )
        .fetch_all(db)
        .await?;

        let mut cpu_usage: HashMap<String, f64> = HashMap::new();
        let mut ram_usage: HashMap<String, f64> = HashMap::new();
        for row in rows {
            let host: String = row.try_get("compute_host")?;
            cpu_usage.insert(host.clone(), row.try_get("avg_cpu_usage_pct")?);
            ram_usage.insert(host, row.try_get("avg_ram_usage_pct")?);
        }

        let mut result = StepResult::no_effect(&request.hosts());
        for (host, activation) in result.activations.iter_mut() {
            if let Some(cpu) = cpu_usage.get(host) {
                *activation = opts.scale.scale(100.0 - cpu);
            } else {
                *activation = no_effect();
            }
        }
        result.statistics.insert(
            "avg cpu usage".to_string(),
            StepStatistics {
                unit: "%".to_string(),
                hosts: cpu_usage,
            },
        );
        result.statistics.insert(
            "avg ram usage".to_string(),
            StepStatistics {
                unit: "%".to_string(),
                hosts: ram_usage,
            },
        );
        Ok(result)
    }
}
