use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;

use crate::activation::no_effect;
use crate::request::{NovaRequest, PipelineRequest};
use crate::step::{PipelineError, Step, StepResult, decode_opts};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ComputeCapabilityOpts {
    required_trait: String,
}

/// Filter: keeps only hosts carrying the required capability trait. The
/// pipeline step reference must disable the host-count validation.
#[derive(Default)]
pub struct ComputeCapabilityStep {
    opts: Option<ComputeCapabilityOpts>,
}

#[async_trait]
impl Step<NovaRequest> for ComputeCapabilityStep {
    fn name(&self) -> &str {
        "compute_capability"
    }

    async fn init(&mut self, _db: PgPool, opts: serde_json::Value) -> Result<(), PipelineError> {
        self.opts = Some(decode_opts("compute_capability", &opts)?);
        Ok(())
    }

    async fn run(&self, request: &NovaRequest) -> Result<StepResult, PipelineError> {
        let Some(opts) = &self.opts else {
            return Err(PipelineError::StepRun {
                step: "compute_capability".into(),
                source: anyhow::anyhow!("step not initialized"),
            });
        };
        let activations: HashMap<String, f64> = request
            .hosts()
            .into_iter()
            .filter(|host| {
                request
                    .host_traits(host)
                    .iter()
                    .any(|t| t == &opts.required_trait)
            })
            .map(|host| (host, no_effect()))
            .collect();
        Ok(StepResult {
            activations,
            statistics: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::nova::NovaHost;
    use serde_json::json;

    #[tokio::test]
    async fn keeps_only_hosts_with_the_trait() {
        let mut step = ComputeCapabilityStep::default();
        let db = PgPool::connect_lazy("postgres://cortex@localhost/cortex").unwrap();
        step.init(db, json!({"requiredTrait": "COMPUTE_NET_VIRTIO"}))
            .await
            .unwrap();

        let request = NovaRequest {
            spec: serde_json::Value::Null,
            context: serde_json::Value::Null,
            hosts: vec![
                NovaHost {
                    host: "h1".into(),
                    hypervisor_type: None,
                    traits: vec!["COMPUTE_NET_VIRTIO".into()],
                },
                NovaHost {
                    host: "h2".into(),
                    hypervisor_type: None,
                    traits: vec![],
                },
            ],
            weights: HashMap::new(),
        };
        let result = step.run(&request).await.unwrap();
        assert_eq!(result.activations.len(), 1);
        assert!(result.activations.contains_key("h1"));
    }
}
