//! The generic scheduling pipeline runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use libbus::{MessageBus, topics};
use serde_json::json;

use crate::request::PipelineRequest;
use crate::step::{PipelineError, Step};

/// Outcome of one pipeline run: the ranked host list plus the per-step
/// breakdown the explanation controller attributes the outcome to.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub ordered_hosts: Vec<String>,
    pub target_host: Option<String>,
    pub input_weights: BTreeMap<String, f64>,
    pub final_weights: BTreeMap<String, f64>,
    pub step_activations: BTreeMap<String, BTreeMap<String, f64>>,
    pub step_removed_hosts: BTreeMap<String, Vec<String>>,
}

/// An ordered sequence of wrapped steps for one scheduling domain.
///
/// Steps run sequentially; a process may run multiple pipelines
/// concurrently since steps only read their feature tables.
pub struct Pipeline<R: PipelineRequest> {
    name: String,
    steps: Vec<Box<dyn Step<R>>>,
    bus: Arc<dyn MessageBus>,
    create_decisions: bool,
}

impl<R: PipelineRequest> std::fmt::Debug for Pipeline<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("name", &self.name).finish()
    }
}

impl<R: PipelineRequest> Pipeline<R> {
    pub fn new(
        name: impl Into<String>,
        steps: Vec<Box<dyn Step<R>>>,
        bus: Arc<dyn MessageBus>,
        create_decisions: bool,
    ) -> Self {
        Self {
            name: name.into(),
            steps,
            bus,
            create_decisions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether decisions handled synchronously through the API are also
    /// persisted as objects.
    pub fn create_decisions(&self) -> bool {
        self.create_decisions
    }

    /// Runs every step in order, accumulating activations into the input
    /// weights, and ranks the surviving hosts by final weight (descending,
    /// ties broken by host id). An empty candidate set is not an error.
    pub async fn run(&self, request: &R) -> Result<RunOutcome, PipelineError> {
        let hosts = request.hosts();
        let input: BTreeMap<String, f64> = {
            let given = request.weights();
            hosts
                .iter()
                .map(|h| (h.clone(), given.get(h).copied().unwrap_or(0.0)))
                .collect()
        };

        let mut weights = input.clone();
        let mut step_activations = BTreeMap::new();
        let mut step_removed_hosts = BTreeMap::new();
        for step in &self.steps {
            let result = step.run(request).await?;
            // Hosts the step dropped leave the candidate set; hosts an
            // earlier filter dropped stay out even if this step still
            // reports them.
            let mut next = BTreeMap::new();
            for (host, activation) in &result.activations {
                if let Some(weight) = weights.get(host) {
                    next.insert(host.clone(), weight + activation);
                }
            }
            let removed: Vec<String> = weights
                .keys()
                .filter(|h| !next.contains_key(*h))
                .cloned()
                .collect();
            if !removed.is_empty() {
                log::debug!(
                    "pipeline {}: step {} removed hosts {removed:?}",
                    self.name,
                    step.name()
                );
            }
            step_removed_hosts.insert(step.name().to_string(), removed);
            step_activations.insert(
                step.name().to_string(),
                result
                    .activations
                    .iter()
                    .map(|(h, a)| (h.clone(), *a))
                    .collect(),
            );
            weights = next;
        }

        let mut ordered: Vec<String> = weights.keys().cloned().collect();
        ordered.sort_by(|a, b| {
            weights[b]
                .total_cmp(&weights[a])
                .then_with(|| a.cmp(b))
        });
        let target_host = ordered.first().cloned();

        self.bus
            .publish(
                &topics::pipeline_finished(R::domain().as_str()),
                json!({
                    "pipeline": self.name,
                    "candidates": hosts.len(),
                    "ordered": ordered.len(),
                    "target": target_host,
                }),
            )
            .await;

        Ok(RunOutcome {
            ordered_hosts: ordered,
            target_host,
            input_weights: input,
            final_weights: weights,
            step_activations,
            step_removed_hosts,
        })
    }
}
