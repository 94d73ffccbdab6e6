use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::meta::{Condition, ObjectMeta, ObjectRef, SchedulingDomain};

/// Reference to the pipeline that handles a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRef {
    pub name: String,
}

/// A durable record of one scheduling request: the request itself, the
/// ranked result, timing, and an auditable explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub metadata: ObjectMeta,
    pub spec: DecisionSpec,
    #[serde(default)]
    pub status: DecisionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSpec {
    pub scheduling_domain: SchedulingDomain,
    pub operator: String,
    pub pipeline_ref: PipelineRef,
    /// Identifier of the resource being placed (server id, pod name, machine
    /// name). Decisions for the same resource form a chain.
    pub resource_id: String,
    /// Full external scheduler request, verbatim, for the Nova domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nova_raw: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ref: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_ref: Option<ObjectRef>,
    /// Name of a reservation linked to this decision, if any. Linked
    /// decisions are exempt from cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DecisionResult>,
    /// Wall-clock duration of the pipeline run, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub took: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Earlier decisions for the same resource, chronological.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precedence: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Ranked outcome of a pipeline run, together with the per-step breakdown
/// the explanation controller attributes the outcome to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    pub ordered_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_host: Option<String>,
    /// Weights the request arrived with.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_weights: BTreeMap<String, f64>,
    /// Final per-host weights after all steps were applied.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub final_weights: BTreeMap<String, f64>,
    /// Per-step activations, keyed by step name then host.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_activations: BTreeMap<String, BTreeMap<String, f64>>,
    /// Hosts each filter-type step removed from the candidate set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_removed_hosts: BTreeMap<String, Vec<String>>,
}

impl Decision {
    /// Whether the decision still awaits a pipeline run.
    pub fn is_pending(&self) -> bool {
        self.status.result.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_until_result_written() {
        let mut decision = Decision {
            metadata: ObjectMeta::named("nova-abc"),
            spec: DecisionSpec {
                scheduling_domain: SchedulingDomain::Nova,
                operator: "cortex".into(),
                pipeline_ref: PipelineRef {
                    name: "nova-external-scheduler-kvm".into(),
                },
                resource_id: "srv-1".into(),
                nova_raw: None,
                pod_ref: None,
                machine_ref: None,
                reservation: None,
            },
            status: DecisionStatus::default(),
        };
        assert!(decision.is_pending());
        decision.status.result = Some(DecisionResult {
            ordered_hosts: vec!["h1".into()],
            target_host: Some("h1".into()),
            ..Default::default()
        });
        assert!(!decision.is_pending());
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = DecisionSpec {
            scheduling_domain: SchedulingDomain::Pods,
            operator: "cortex".into(),
            pipeline_ref: PipelineRef {
                name: "pods-default".into(),
            },
            resource_id: "default/web-0".into(),
            nova_raw: None,
            pod_ref: Some(ObjectRef::new("pods", "default/web-0")),
            machine_ref: None,
            reservation: None,
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: DecisionSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.resource_id, "default/web-0");
        assert_eq!(back.pod_ref.unwrap().name, "default/web-0");
    }
}
