//! Step registries and pipeline materialization.
//!
//! Each scheduling domain has a static registry mapping implementation
//! names to constructors. A pipeline object is materialized by resolving
//! every step reference through its step object and the registry, then
//! wrapping each instance as monitor ∘ validator ∘ scoper ∘ step.

use std::collections::HashMap;
use std::sync::Arc;

use common::step::StepObject;
use common::{PipelineSpec, StepScope};
use libbus::MessageBus;
use sqlx::PgPool;

use crate::monitor::{MonitoredStep, PipelineMetrics};
use crate::request::{MachineRequest, NovaRequest, PipelineRequest, PodRequest};
use crate::scoper::ScopedStep;
use crate::step::{PipelineError, Step};
use crate::steps::{
    ComputeCapabilityStep, FlavorBinpackingStep, HostUtilizationStep, NoopStep,
};
use crate::validator::ValidatedStep;

pub type StepConstructor<R> = fn() -> Box<dyn Step<R>>;

fn new_noop<R: PipelineRequest>() -> Box<dyn Step<R>> {
    Box::new(NoopStep)
}

fn new_host_utilization() -> Box<dyn Step<NovaRequest>> {
    Box::new(HostUtilizationStep::default())
}

fn new_flavor_binpacking() -> Box<dyn Step<NovaRequest>> {
    Box::new(FlavorBinpackingStep::default())
}

fn new_compute_capability() -> Box<dyn Step<NovaRequest>> {
    Box::new(ComputeCapabilityStep::default())
}

pub fn nova_registry() -> HashMap<&'static str, StepConstructor<NovaRequest>> {
    let mut registry: HashMap<&'static str, StepConstructor<NovaRequest>> = HashMap::new();
    registry.insert("noop", new_noop::<NovaRequest>);
    registry.insert("host_utilization", new_host_utilization);
    registry.insert("flavor_binpacking", new_flavor_binpacking);
    registry.insert("compute_capability", new_compute_capability);
    registry
}

pub fn pod_registry() -> HashMap<&'static str, StepConstructor<PodRequest>> {
    let mut registry: HashMap<&'static str, StepConstructor<PodRequest>> = HashMap::new();
    registry.insert("noop", new_noop::<PodRequest>);
    registry
}

pub fn machine_registry() -> HashMap<&'static str, StepConstructor<MachineRequest>> {
    let mut registry: HashMap<&'static str, StepConstructor<MachineRequest>> = HashMap::new();
    registry.insert("noop", new_noop::<MachineRequest>);
    registry
}

/// Materializes a pipeline from its object spec.
///
/// Every step reference must resolve to a step object, and the step
/// object's implementation must exist in the registry; both failures are
/// config errors. Options on the pipeline step reference override the step
/// object's defaults.
pub async fn build_pipeline<R: PipelineRequest>(
    name: &str,
    spec: &PipelineSpec,
    step_objects: &HashMap<String, StepObject>,
    registry: &HashMap<&'static str, StepConstructor<R>>,
    db: PgPool,
    bus: Arc<dyn MessageBus>,
    metrics: Option<PipelineMetrics>,
) -> Result<crate::runtime::Pipeline<R>, PipelineError> {
    let mut steps: Vec<Box<dyn Step<R>>> = Vec::with_capacity(spec.steps.len());
    for step_ref in &spec.steps {
        let object = step_objects
            .get(&step_ref.name)
            .ok_or_else(|| PipelineError::UnknownStep(step_ref.name.clone()))?;
        let constructor = registry
            .get(object.spec.implementation.as_str())
            .ok_or_else(|| PipelineError::UnknownStep(object.spec.implementation.clone()))?;

        let mut step = constructor();
        let opts = if step_ref.opts.is_null() {
            object.spec.opts.clone()
        } else {
            step_ref.opts.clone()
        };
        step.init(db.clone(), opts).await?;

        let scope: StepScope = step_ref.scope.clone().unwrap_or_default();
        let scoped = ScopedStep::new(step, scope);
        let validated = ValidatedStep::new(Box::new(scoped), step_ref.disabled_validations);
        let wrapped: Box<dyn Step<R>> = match &metrics {
            Some(metrics) => Box::new(MonitoredStep::new(Box::new(validated), metrics.clone())),
            None => Box::new(validated),
        };
        steps.push(wrapped);
    }
    Ok(crate::runtime::Pipeline::new(
        name,
        steps,
        bus,
        spec.create_decisions,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::meta::{ObjectMeta, SchedulingDomain};
    use common::pipeline::{PipelineStepRef, PipelineType};
    use common::step::{StepObjectSpec, StepType};
    use libbus::LocalBus;

    fn noop_step_object(name: &str) -> StepObject {
        StepObject {
            metadata: ObjectMeta::named(name),
            spec: StepObjectSpec {
                operator: "cortex".into(),
                scheduling_domain: SchedulingDomain::Nova,
                step_type: StepType::Weigher,
                implementation: "noop".into(),
                opts: serde_json::Value::Null,
            },
        }
    }

    fn pipeline_spec(step_names: &[&str]) -> PipelineSpec {
        PipelineSpec {
            scheduling_domain: SchedulingDomain::Nova,
            operator: "cortex".into(),
            pipeline_type: PipelineType::FilterWeigher,
            create_decisions: false,
            steps: step_names
                .iter()
                .map(|name| PipelineStepRef {
                    name: name.to_string(),
                    opts: serde_json::Value::Null,
                    dependencies: None,
                    scope: None,
                    disabled_validations: Default::default(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn builds_a_pipeline_from_spec_and_step_objects() {
        let db = PgPool::connect_lazy("postgres://cortex@localhost/cortex").unwrap();
        let steps = HashMap::from([("w1".to_string(), noop_step_object("w1"))]);
        let pipeline = build_pipeline(
            "nova-default",
            &pipeline_spec(&["w1"]),
            &steps,
            &nova_registry(),
            db,
            Arc::new(LocalBus::new()),
            None,
        )
        .await
        .unwrap();
        assert_eq!(pipeline.name(), "nova-default");
    }

    #[tokio::test]
    async fn unknown_step_reference_is_a_config_error() {
        let db = PgPool::connect_lazy("postgres://cortex@localhost/cortex").unwrap();
        let err = build_pipeline(
            "nova-default",
            &pipeline_spec(&["missing"]),
            &HashMap::new(),
            &nova_registry(),
            db,
            Arc::new(LocalBus::new()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStep(name) if name == "missing"));
    }

    #[tokio::test]
    async fn unknown_implementation_is_a_config_error() {
        let db = PgPool::connect_lazy("postgres://cortex@localhost/cortex").unwrap();
        let mut object = noop_step_object("w1");
        object.spec.implementation = "does_not_exist".into();
        let steps = HashMap::from([("w1".to_string(), object)]);
        let err = build_pipeline(
            "nova-default",
            &pipeline_spec(&["w1"]),
            &steps,
            &nova_registry(),
            db,
            Arc::new(LocalBus::new()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownStep(name) if name == "does_not_exist"));
    }
}
