//! Seeds the default Nova step and pipeline objects so the external
//! scheduler's inferred pipeline names resolve on a fresh cluster.
//! Existing objects are left untouched.

use anyhow::Result;
use common::meta::ObjectMeta;
use common::pipeline::{Pipeline, PipelineSpec, PipelineStepRef, PipelineType};
use common::step::{StepObject, StepObjectSpec, StepType};
use common::{DisabledValidations, SchedulingDomain};
use serde_json::json;

use crate::api::{PIPELINE_KVM, PIPELINE_KVM_ALL_FILTERS, PIPELINE_VMWARE};
use crate::store::kinds;
use crate::store::multicluster::MulticlusterStore;

fn step(
    operator: &str,
    name: &str,
    step_type: StepType,
    implementation: &str,
    opts: serde_json::Value,
) -> StepObject {
    StepObject {
        metadata: ObjectMeta::named(name).with_operator(operator),
        spec: StepObjectSpec {
            operator: operator.to_string(),
            scheduling_domain: SchedulingDomain::Nova,
            step_type,
            implementation: implementation.to_string(),
            opts,
        },
    }
}

fn step_ref(name: &str) -> PipelineStepRef {
    PipelineStepRef {
        name: name.to_string(),
        opts: serde_json::Value::Null,
        dependencies: None,
        scope: None,
        disabled_validations: DisabledValidations::default(),
    }
}

fn pipeline(operator: &str, name: &str, steps: Vec<PipelineStepRef>) -> Pipeline {
    Pipeline {
        metadata: ObjectMeta::named(name).with_operator(operator),
        spec: PipelineSpec {
            scheduling_domain: SchedulingDomain::Nova,
            operator: operator.to_string(),
            pipeline_type: PipelineType::FilterWeigher,
            create_decisions: true,
            steps,
        },
        status: Default::default(),
    }
}

pub fn default_steps(operator: &str) -> Vec<StepObject> {
    vec![
        step(
            operator,
            "host-utilization",
            StepType::Weigher,
            "host_utilization",
            json!({"scale": {
                "xLower": 0.0, "xUpper": 100.0, "yLower": 0.0, "yUpper": 1.0,
            }}),
        ),
        step(
            operator,
            "flavor-binpacking",
            StepType::Weigher,
            "flavor_binpacking",
            json!({"scale": {
                "xLower": -32.0, "xUpper": 0.0, "yLower": 0.0, "yUpper": 0.5,
            }}),
        ),
        step(
            operator,
            "compute-capability",
            StepType::Filter,
            "compute_capability",
            json!({"requiredTrait": "COMPUTE_STATUS_ENABLED"}),
        ),
    ]
}

pub fn default_pipelines(operator: &str) -> Vec<Pipeline> {
    let mut filter = step_ref("compute-capability");
    filter.disabled_validations = DisabledValidations {
        same_host_number_in_out: true,
    };
    vec![
        pipeline(
            operator,
            PIPELINE_KVM,
            vec![step_ref("host-utilization"), step_ref("flavor-binpacking")],
        ),
        pipeline(
            operator,
            PIPELINE_KVM_ALL_FILTERS,
            vec![
                filter,
                step_ref("host-utilization"),
                step_ref("flavor-binpacking"),
            ],
        ),
        pipeline(operator, PIPELINE_VMWARE, vec![step_ref("host-utilization")]),
    ]
}

pub async fn seed_defaults(store: &MulticlusterStore, operator: &str) -> Result<()> {
    for object in default_steps(operator) {
        let name = object.metadata.name.clone();
        if store
            .get::<StepObject>(kinds::STEPS, &name)
            .await?
            .is_none()
        {
            tracing::info!("seeding step {name}");
            store.put(kinds::STEPS, &name, &object).await?;
        }
    }
    for object in default_pipelines(operator) {
        let name = object.metadata.name.clone();
        if store
            .get::<Pipeline>(kinds::PIPELINES, &name)
            .await?
            .is_none()
        {
            tracing::info!("seeding pipeline {name}");
            store.put(kinds::PIPELINES, &name, &object).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inferred_pipeline_names_are_seeded() {
        let names: Vec<String> = default_pipelines("cortex")
            .into_iter()
            .map(|p| p.metadata.name)
            .collect();
        assert!(names.contains(&PIPELINE_KVM.to_string()));
        assert!(names.contains(&PIPELINE_KVM_ALL_FILTERS.to_string()));
        assert!(names.contains(&PIPELINE_VMWARE.to_string()));
    }

    #[test]
    fn seeded_step_refs_resolve_to_seeded_steps() {
        let steps: Vec<String> = default_steps("cortex")
            .into_iter()
            .map(|s| s.metadata.name)
            .collect();
        for pipeline in default_pipelines("cortex") {
            for step_ref in pipeline.spec.steps {
                assert!(steps.contains(&step_ref.name), "missing {}", step_ref.name);
            }
        }
    }

    #[test]
    fn only_the_filter_step_disables_host_count_validation() {
        for pipeline in default_pipelines("cortex") {
            for step_ref in pipeline.spec.steps {
                let expected = step_ref.name == "compute-capability";
                assert_eq!(
                    step_ref.disabled_validations.same_host_number_in_out,
                    expected
                );
            }
        }
    }
}
