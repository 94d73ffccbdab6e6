use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::nova::NovaHost;
use common::{DisabledValidations, StepScope};
use libbus::LocalBus;
use libpipeline::{
    Pipeline, PipelineError, ScopedStep, Step, StepResult, ValidatedStep,
};
use libpipeline::request::NovaRequest;
use sqlx::PgPool;

struct FixedStep {
    name: &'static str,
    activations: HashMap<String, f64>,
}

#[async_trait]
impl Step<NovaRequest> for FixedStep {
    fn name(&self) -> &str {
        self.name
    }

    async fn init(&mut self, _: PgPool, _: serde_json::Value) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn run(&self, _: &NovaRequest) -> Result<StepResult, PipelineError> {
        Ok(StepResult {
            activations: self.activations.clone(),
            statistics: HashMap::new(),
        })
    }
}

fn fixed(name: &'static str, activations: &[(&str, f64)]) -> Box<dyn Step<NovaRequest>> {
    Box::new(FixedStep {
        name,
        activations: activations
            .iter()
            .map(|(h, a)| (h.to_string(), *a))
            .collect(),
    })
}

fn request(hosts: &[&str], weights: &[(&str, f64)]) -> NovaRequest {
    NovaRequest {
        spec: serde_json::Value::Null,
        context: serde_json::Value::Null,
        hosts: hosts
            .iter()
            .map(|h| NovaHost {
                host: h.to_string(),
                hypervisor_type: None,
                traits: vec![],
            })
            .collect(),
        weights: weights.iter().map(|(h, w)| (h.to_string(), *w)).collect(),
    }
}

/// Wraps a step the way the registry does, without metrics.
fn wrapped(
    step: Box<dyn Step<NovaRequest>>,
    disabled: DisabledValidations,
) -> Box<dyn Step<NovaRequest>> {
    let scoped = ScopedStep::new(step, StepScope::default());
    Box::new(ValidatedStep::new(Box::new(scoped), disabled))
}

#[tokio::test]
async fn wrapped_step_preserves_host_set_and_ranking() {
    let step = wrapped(
        fixed("w1", &[("h1", 1.0), ("h2", 0.0), ("h3", -1.0)]),
        DisabledValidations::default(),
    );
    let pipeline = Pipeline::new("nova-test", vec![step], Arc::new(LocalBus::new()), false);
    let req = request(&["h1", "h2", "h3"], &[("h1", 0.2), ("h2", 0.1), ("h3", 0.0)]);

    let outcome = pipeline.run(&req).await.unwrap();
    assert_eq!(outcome.ordered_hosts, vec!["h1", "h2", "h3"]);
    assert_eq!(outcome.final_weights["h1"], 1.2);
    assert_eq!(outcome.final_weights["h2"], 0.1);
    assert_eq!(outcome.final_weights["h3"], -1.0);
}

#[tokio::test]
async fn filter_step_without_disabled_validation_aborts_the_run() {
    let step = wrapped(fixed("f1", &[("h1", 0.0)]), DisabledValidations::default());
    let pipeline = Pipeline::new("nova-test", vec![step], Arc::new(LocalBus::new()), false);
    let req = request(&["h1", "h2"], &[]);

    let err = pipeline.run(&req).await.unwrap_err();
    assert!(matches!(err, PipelineError::HostCountChanged { .. }));
}

#[tokio::test]
async fn filter_step_with_disabled_validation_shrinks_the_candidate_set() {
    let filter = wrapped(
        fixed("f1", &[("h2", 0.0)]),
        DisabledValidations {
            same_host_number_in_out: true,
        },
    );
    let weigher = wrapped(
        fixed("w1", &[("h1", 5.0), ("h2", 1.0)]),
        DisabledValidations::default(),
    );
    let pipeline = Pipeline::new(
        "nova-test",
        vec![filter, weigher],
        Arc::new(LocalBus::new()),
        false,
    );
    let req = request(&["h1", "h2"], &[]);

    let outcome = pipeline.run(&req).await.unwrap();
    // h1 was filtered out; the weigher cannot bring it back.
    assert_eq!(outcome.ordered_hosts, vec!["h2"]);
    assert_eq!(outcome.step_removed_hosts["f1"], vec!["h1"]);
}

#[tokio::test]
async fn sentinel_negative_activation_keeps_host_ranked_last() {
    let filter_like = wrapped(
        fixed("f1", &[("h1", -1000.0), ("h2", 0.0)]),
        DisabledValidations::default(),
    );
    let weigher = wrapped(
        fixed("w1", &[("h1", 1.0), ("h2", 0.5)]),
        DisabledValidations::default(),
    );
    let pipeline = Pipeline::new(
        "nova-test",
        vec![filter_like, weigher],
        Arc::new(LocalBus::new()),
        false,
    );
    let req = request(&["h1", "h2"], &[]);

    let outcome = pipeline.run(&req).await.unwrap();
    assert_eq!(outcome.ordered_hosts, vec!["h2", "h1"]);
}
