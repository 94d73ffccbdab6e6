//! Domain-specific pipeline requests.
//!
//! The runtime is generic over the request type; the three scheduling
//! domains share it through this trait.

use std::collections::HashMap;

use common::SchedulingDomain;
use common::nova::NovaHost;
use common::workload::{MachineObject, PodObject};
use serde::{Deserialize, Serialize};

pub trait PipelineRequest: Clone + Send + Sync + 'static {
    fn domain() -> SchedulingDomain;

    /// Candidate host identifiers, in request order.
    fn hosts(&self) -> Vec<String>;

    /// Input weight per host. Hosts without an entry start at zero.
    fn weights(&self) -> HashMap<String, f64>;

    /// Capability traits of a host, for scope selectors.
    fn host_traits(&self, _host: &str) -> Vec<String> {
        Vec::new()
    }

    fn host_hypervisor_type(&self, _host: &str) -> Option<String> {
        None
    }

    /// Flavor name of the requested workload, for spec selectors.
    fn flavor_name(&self) -> Option<String> {
        None
    }
}

/// A Nova placement request: the external scheduler request body plus the
/// candidate hosts enriched with their capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NovaRequest {
    pub spec: serde_json::Value,
    #[serde(default)]
    pub context: serde_json::Value,
    pub hosts: Vec<NovaHost>,
    pub weights: HashMap<String, f64>,
}

impl PipelineRequest for NovaRequest {
    fn domain() -> SchedulingDomain {
        SchedulingDomain::Nova
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.host.clone()).collect()
    }

    fn weights(&self) -> HashMap<String, f64> {
        self.weights.clone()
    }

    fn host_traits(&self, host: &str) -> Vec<String> {
        self.hosts
            .iter()
            .find(|h| h.host == host)
            .map(|h| h.traits.clone())
            .unwrap_or_default()
    }

    fn host_hypervisor_type(&self, host: &str) -> Option<String> {
        self.hosts
            .iter()
            .find(|h| h.host == host)
            .and_then(|h| h.hypervisor_type.clone())
    }

    fn flavor_name(&self) -> Option<String> {
        self.spec
            .get("data")?
            .get("flavor")?
            .get("data")?
            .get("name")?
            .as_str()
            .map(str::to_string)
    }
}

/// A pod placement request: the pod and the candidate node names. Pods
/// carry no input weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodRequest {
    pub pod: PodObject,
    pub nodes: Vec<String>,
}

impl PipelineRequest for PodRequest {
    fn domain() -> SchedulingDomain {
        SchedulingDomain::Pods
    }

    fn hosts(&self) -> Vec<String> {
        self.nodes.clone()
    }

    fn weights(&self) -> HashMap<String, f64> {
        HashMap::new()
    }
}

/// A machine placement request: the machine and the candidate pool names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineRequest {
    pub machine: MachineObject,
    pub pools: Vec<String>,
}

impl PipelineRequest for MachineRequest {
    fn domain() -> SchedulingDomain {
        SchedulingDomain::Machines
    }

    fn hosts(&self) -> Vec<String> {
        self.pools.clone()
    }

    fn weights(&self) -> HashMap<String, f64> {
        HashMap::new()
    }
}
