//! Scheduling pipeline runtime.
//!
//! A pipeline composes filter and weigher steps into an ordered sequence.
//! Each step emits a per-host activation; the runtime adds activations to
//! the request's input weights and ranks the hosts. Steps are wrapped
//! outside-in as monitor ∘ validator ∘ scoper ∘ step, so scoping neutralizes
//! out-of-scope hosts before validation counts them and before the monitor
//! records them.

pub mod activation;
pub mod monitor;
pub mod registry;
pub mod request;
pub mod runtime;
pub mod scoper;
pub mod step;
pub mod steps;
pub mod validator;

pub use activation::{MinMaxScale, no_effect};
pub use monitor::{MonitoredStep, PipelineMetrics};
pub use registry::{StepConstructor, build_pipeline, machine_registry, nova_registry, pod_registry};
pub use request::{MachineRequest, NovaRequest, PipelineRequest, PodRequest};
pub use runtime::{Pipeline, RunOutcome};
pub use scoper::ScopedStep;
pub use step::{PipelineError, Step, StepResult, StepStatistics, decode_opts};
pub use validator::ValidatedStep;
