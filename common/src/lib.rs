//! Scheduling object definitions shared across the cortex workspace.
//!
//! These mirror the custom resources persisted in the object store:
//! decisions, pipelines, steps, reservations, knowledge snapshots, and the
//! workload objects (pods, nodes, machines, machine pools) the controllers
//! operate on.

pub mod decision;
pub mod meta;
pub mod nova;
pub mod pipeline;
pub mod reservation;
pub mod step;
pub mod workload;

pub use decision::{Decision, DecisionResult, DecisionSpec, DecisionStatus, PipelineRef};
pub use meta::{Condition, ConditionStatus, ConditionType, ObjectMeta, ObjectRef, SchedulingDomain};
pub use pipeline::{
    DisabledValidations, HostSelector, Pipeline, PipelineSpec, PipelineStatus, PipelineStepRef,
    PipelineType, SelectorAction, SelectorOperation, SpecSelector, StepScope,
};
pub use reservation::{Knowledge, Reservation};
pub use step::{StepObject, StepType};
