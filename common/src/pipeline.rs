use serde::{Deserialize, Serialize};

use crate::meta::{Condition, ObjectMeta, SchedulingDomain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineType {
    FilterWeigher,
}

/// Declarative pipeline configuration: an ordered list of step references,
/// each with options, scope, and validation switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub metadata: ObjectMeta,
    pub spec: PipelineSpec,
    #[serde(default)]
    pub status: PipelineStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    pub scheduling_domain: SchedulingDomain,
    pub operator: String,
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    /// Whether decisions handled synchronously through the API are also
    /// persisted as objects.
    #[serde(default)]
    pub create_decisions: bool,
    pub steps: Vec<PipelineStepRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStepRef {
    pub name: String,
    /// Plugin-specific options, decoded and validated by the step at init.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub opts: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<StepDependencies>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<StepScope>,
    #[serde(default)]
    pub disabled_validations: DisabledValidations,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDependencies {
    #[serde(default)]
    pub features: Vec<String>,
}

/// Declarative scoping of a step to a subset of hosts and requests. Out of
/// scope hosts keep their cardinality but receive the no-effect activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepScope {
    #[serde(default)]
    pub host_selectors: Vec<HostSelector>,
    #[serde(default)]
    pub spec_selectors: Vec<SpecSelector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSelector {
    /// What to match the infix against: "trait" or "hypervisortype".
    pub subject: String,
    pub infix: String,
    pub operation: SelectorOperation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorOperation {
    Union,
    Intersection,
    Difference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecSelector {
    /// What to match the infix against; only "flavor" is recognized.
    pub subject: String,
    pub infix: String,
    pub action: SelectorAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorAction {
    Skip,
    Continue,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisabledValidations {
    /// Filter-type steps drop hosts and must disable this validation.
    #[serde(default)]
    pub same_host_number_in_out: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_ref_defaults() {
        let step: PipelineStepRef = serde_json::from_str(r#"{"name":"noop"}"#).unwrap();
        assert!(step.opts.is_null());
        assert!(step.scope.is_none());
        assert!(!step.disabled_validations.same_host_number_in_out);
    }

    #[test]
    fn selector_operations_decode_lowercase() {
        let sel: HostSelector = serde_json::from_str(
            r#"{"subject":"trait","infix":"TRAIT_A","operation":"intersection"}"#,
        )
        .unwrap();
        assert_eq!(sel.operation, SelectorOperation::Intersection);
    }
}
