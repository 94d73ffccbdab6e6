//! Wire schema of the external Nova scheduler endpoint.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Flavor extra spec carrying the hypervisor type, used for pipeline
/// inference when no pipeline is named explicitly.
pub const HYPERVISOR_TYPE_EXTRA_SPEC: &str = "capabilities:hypervisor_type";

/// Request body of `POST /scheduler/nova/external`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSchedulerRequest {
    /// Nova request spec, verbatim. Navigated only for pipeline inference.
    pub spec: serde_json::Value,
    #[serde(default)]
    pub context: serde_json::Value,
    pub hosts: Vec<NovaHost>,
    pub weights: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaHost {
    /// Compute host name, the key used in `weights` and in activations.
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypervisor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSchedulerResponse {
    pub hosts: Vec<String>,
}

impl ExternalSchedulerRequest {
    /// Hypervisor type from `spec.data.flavor.data.extra_specs`, if present.
    pub fn hypervisor_type(&self) -> Option<&str> {
        self.spec
            .get("data")?
            .get("flavor")?
            .get("data")?
            .get("extra_specs")?
            .get(HYPERVISOR_TYPE_EXTRA_SPEC)?
            .as_str()
    }

    /// Server instance uuid from `spec.data.instance_uuid`, if present.
    pub fn instance_id(&self) -> Option<&str> {
        self.spec.get("data")?.get("instance_uuid")?.as_str()
    }

    /// Flavor name from `spec.data.flavor.data.name`, if present.
    pub fn flavor_name(&self) -> Option<&str> {
        self.spec
            .get("data")?
            .get("flavor")?
            .get("data")?
            .get("name")?
            .as_str()
    }
}
