use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, SchedulingDomain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    Filter,
    Weigher,
}

/// A step definition: binds a referenceable name to a plugin implementation
/// and its default options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepObject {
    pub metadata: ObjectMeta,
    pub spec: StepObjectSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepObjectSpec {
    pub operator: String,
    pub scheduling_domain: SchedulingDomain,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Name of the plugin implementation in the step registry.
    #[serde(rename = "impl")]
    pub implementation: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub opts: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impl_field_keeps_reserved_name_on_the_wire() {
        let step = StepObject {
            metadata: ObjectMeta::named("host-utilization"),
            spec: StepObjectSpec {
                operator: "cortex".into(),
                scheduling_domain: SchedulingDomain::Nova,
                step_type: StepType::Weigher,
                implementation: "host_utilization".into(),
                opts: serde_json::Value::Null,
            },
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["spec"]["impl"], "host_utilization");
        assert_eq!(json["spec"]["type"], "Weigher");
    }
}
