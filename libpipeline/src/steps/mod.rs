//! Step plugins.
//!
//! Plugins are looked up by implementation name in the per-domain
//! registries and configured through their options blob at init. The
//! domain-specific heuristics live in the individual plugins; the runtime
//! only sees the [`Step`](crate::step::Step) contract.

pub mod compute_capability;
pub mod flavor_binpacking;
pub mod host_utilization;
pub mod noop;

pub use compute_capability::ComputeCapabilityStep;
pub use flavor_binpacking::FlavorBinpackingStep;
pub use host_utilization::HostUtilizationStep;
pub use noop::NoopStep;
