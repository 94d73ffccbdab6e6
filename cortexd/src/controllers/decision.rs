//! Decision reconciliation.
//!
//! One controller per scheduling domain. It watches decisions, pipelines,
//! steps, and knowledge snapshots; materializes pipelines from their object
//! specs; and runs every pending decision through its pipeline, writing the
//! ranked result back into the decision status. Reconciles are serialized
//! by a controller-wide mutex so no two runs observe different feature
//! snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use common::nova::{ExternalSchedulerRequest, NovaHost};
use common::workload::{MachineObject, NodeObject, PodObject};
use common::{
    Condition, ConditionStatus, ConditionType, Decision, DecisionResult, DecisionStatus,
    PipelineType, SchedulingDomain,
};
use etcd_client::EventType;
use libbus::MessageBus;
use libpipeline::{
    MachineRequest, NovaRequest, Pipeline, PipelineError, PipelineMetrics, PodRequest, RunOutcome,
    build_pipeline, machine_registry, nova_registry, pod_registry,
};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::store::multicluster::MulticlusterStore;
use crate::store::{kinds, name_from_key};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("pipeline `{0}` is not ready")]
    PipelineNotReady(String),
    #[error("invalid decision: {0}")]
    Validation(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("canceled")]
    Canceled,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ProcessError {
    /// Condition reason and message for a failed decision.
    fn condition(&self) -> Condition {
        match self {
            ProcessError::PipelineNotReady(name) => {
                Condition::error("PipelineNotReady", format!("pipeline `{name}` is not ready"))
            }
            ProcessError::Validation(msg) => Condition::error("InvalidRequest", msg.clone()),
            ProcessError::Pipeline(PipelineError::StepRun { step, source }) => {
                Condition::error("PluginRunError", format!("step `{step}`: {source}"))
            }
            ProcessError::Pipeline(e) => Condition::error("PipelineError", e.to_string()),
            ProcessError::Canceled => Condition::error("Canceled", ""),
            ProcessError::Store(e) => Condition::error("StoreError", e.to_string()),
        }
    }
}

enum DomainPipeline {
    Nova(Pipeline<NovaRequest>),
    Pods(Pipeline<PodRequest>),
    Machines(Pipeline<MachineRequest>),
}

impl DomainPipeline {
    fn create_decisions(&self) -> bool {
        match self {
            DomainPipeline::Nova(p) => p.create_decisions(),
            DomainPipeline::Pods(p) => p.create_decisions(),
            DomainPipeline::Machines(p) => p.create_decisions(),
        }
    }
}

pub struct DecisionController {
    domain: SchedulingDomain,
    operator: String,
    store: Arc<MulticlusterStore>,
    db: PgPool,
    bus: Arc<dyn MessageBus>,
    metrics: Option<PipelineMetrics>,
    /// Materialized pipelines by name. Rebuilds swap in a fresh instance;
    /// in-flight runs keep the old one.
    pipelines: RwLock<HashMap<String, Arc<DomainPipeline>>>,
    /// Pipelines whose configuration changed; rebuilt on next use.
    dirty: RwLock<HashSet<String>>,
    process_mu: Mutex<()>,
}

impl DecisionController {
    pub fn new(
        domain: SchedulingDomain,
        operator: String,
        store: Arc<MulticlusterStore>,
        db: PgPool,
        bus: Arc<dyn MessageBus>,
        metrics: Option<PipelineMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            domain,
            operator,
            store,
            db,
            bus,
            metrics,
            pipelines: RwLock::new(HashMap::new()),
            dirty: RwLock::new(HashSet::new()),
            process_mu: Mutex::new(()),
        })
    }

    /// Builds all pipelines, reconciles the pending backlog, and spawns the
    /// watch loop.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let pipeline_objects: Vec<common::Pipeline> =
            self.store.list(kinds::PIPELINES).await?;
        for object in &pipeline_objects {
            if self.owns_pipeline(object) {
                self.rebuild_pipeline(&object.metadata.name).await?;
            }
        }

        let (decisions, rev) = self
            .store
            .snapshot_with_rev::<Decision>(kinds::DECISIONS)
            .await?;
        for decision in decisions {
            if self.owns_decision(&decision) && decision.is_pending() {
                if let Err(e) = self.reconcile(&decision.metadata.name).await {
                    tracing::warn!(
                        "initial reconcile of decision {} failed: {e}",
                        decision.metadata.name
                    );
                }
            }
        }

        let (d_watcher, mut d_stream) = self.store.watch_kind(kinds::DECISIONS, rev + 1).await?;
        let (p_watcher, mut p_stream) = self.store.watch_kind(kinds::PIPELINES, 0).await?;
        let (s_watcher, mut s_stream) = self.store.watch_kind(kinds::STEPS, 0).await?;
        let (k_watcher, mut k_stream) = self.store.watch_kind(kinds::KNOWLEDGE, 0).await?;

        let controller = Arc::clone(&self);
        tokio::spawn(async move {
            let _watchers = (d_watcher, p_watcher, s_watcher, k_watcher);
            loop {
                tokio::select! {
                    msg = d_stream.message() => controller.on_decision_event(msg).await,
                    msg = p_stream.message() => controller.on_pipeline_event(msg).await,
                    msg = s_stream.message() => controller.on_config_event(msg, "step").await,
                    msg = k_stream.message() => controller.on_config_event(msg, "knowledge").await,
                }
            }
        });
        Ok(())
    }

    fn owns_decision(&self, decision: &Decision) -> bool {
        decision.spec.operator == self.operator && decision.spec.scheduling_domain == self.domain
    }

    fn owns_pipeline(&self, object: &common::Pipeline) -> bool {
        object.spec.operator == self.operator
            && object.spec.scheduling_domain == self.domain
            && object.spec.pipeline_type == PipelineType::FilterWeigher
    }

    async fn on_decision_event(
        &self,
        msg: std::result::Result<Option<etcd_client::WatchResponse>, etcd_client::Error>,
    ) {
        let resp = match msg {
            Ok(Some(resp)) => resp,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("decision watch error: {e}");
                return;
            }
        };
        for event in resp.events() {
            if event.event_type() != EventType::Put {
                continue;
            }
            let Some(kv) = event.kv() else { continue };
            match serde_json::from_slice::<Decision>(kv.value()) {
                Ok(decision) if self.owns_decision(&decision) && decision.is_pending() => {
                    if let Err(e) = self.reconcile(&decision.metadata.name).await {
                        tracing::warn!(
                            "reconcile of decision {} failed: {e}",
                            decision.metadata.name
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("undecodable decision event: {e}"),
            }
        }
    }

    async fn on_pipeline_event(
        &self,
        msg: std::result::Result<Option<etcd_client::WatchResponse>, etcd_client::Error>,
    ) {
        let Ok(Some(resp)) = msg else { return };
        for event in resp.events() {
            let Some(kv) = event.kv() else { continue };
            let Some(name) = name_from_key(kv.key()) else { continue };
            match event.event_type() {
                EventType::Put => {
                    self.dirty.write().await.insert(name);
                }
                EventType::Delete => {
                    self.pipelines.write().await.remove(&name);
                    self.dirty.write().await.remove(&name);
                }
            }
        }
    }

    /// Step or knowledge change: every materialized pipeline may depend on
    /// it, so all of them are rebuilt on next use.
    async fn on_config_event(
        &self,
        msg: std::result::Result<Option<etcd_client::WatchResponse>, etcd_client::Error>,
        what: &str,
    ) {
        let Ok(Some(resp)) = msg else { return };
        if resp.events().is_empty() {
            return;
        }
        tracing::debug!("{what} changed, marking all pipelines dirty");
        let names: Vec<String> = self.pipelines.read().await.keys().cloned().collect();
        let mut dirty = self.dirty.write().await;
        for name in names {
            dirty.insert(name);
        }
    }

    async fn step_objects(&self) -> Result<HashMap<String, common::StepObject>> {
        let steps: Vec<common::StepObject> = self.store.list(kinds::STEPS).await?;
        Ok(steps
            .into_iter()
            .filter(|s| {
                s.spec.operator == self.operator && s.spec.scheduling_domain == self.domain
            })
            .map(|s| (s.metadata.name.clone(), s))
            .collect())
    }

    async fn build_domain_pipeline(
        &self,
        name: &str,
        object: &common::Pipeline,
    ) -> Result<DomainPipeline, ProcessError> {
        let step_objects = self.step_objects().await?;
        let db = self.db.clone();
        let bus = self.bus.clone();
        let metrics = self.metrics.clone();
        let pipeline = match self.domain {
            SchedulingDomain::Nova => DomainPipeline::Nova(
                build_pipeline(
                    name,
                    &object.spec,
                    &step_objects,
                    &nova_registry(),
                    db,
                    bus,
                    metrics,
                )
                .await?,
            ),
            SchedulingDomain::Pods => DomainPipeline::Pods(
                build_pipeline(
                    name,
                    &object.spec,
                    &step_objects,
                    &pod_registry(),
                    db,
                    bus,
                    metrics,
                )
                .await?,
            ),
            SchedulingDomain::Machines => DomainPipeline::Machines(
                build_pipeline(
                    name,
                    &object.spec,
                    &step_objects,
                    &machine_registry(),
                    db,
                    bus,
                    metrics,
                )
                .await?,
            ),
        };
        Ok(pipeline)
    }

    /// Rebuilds one pipeline from its stored spec. A config error leaves
    /// the pipeline unused and surfaces on its status.
    async fn rebuild_pipeline(&self, name: &str) -> Result<()> {
        let Some(object) = self.store.get::<common::Pipeline>(kinds::PIPELINES, name).await?
        else {
            self.pipelines.write().await.remove(name);
            self.dirty.write().await.remove(name);
            return Ok(());
        };
        if !self.owns_pipeline(&object) {
            return Ok(());
        }
        let condition = match self.build_domain_pipeline(name, &object).await {
            Ok(pipeline) => {
                self.pipelines
                    .write()
                    .await
                    .insert(name.to_string(), Arc::new(pipeline));
                tracing::info!("materialized pipeline {name}");
                Condition {
                    condition_type: ConditionType::Ready,
                    status: ConditionStatus::True,
                    reason: "Materialized".to_string(),
                    message: String::new(),
                }
            }
            Err(e) => {
                self.pipelines.write().await.remove(name);
                tracing::warn!("pipeline {name} has a config error: {e}");
                Condition::not_ready("ConfigError", e.to_string())
            }
        };
        self.store
            .update::<common::Pipeline, _>(kinds::PIPELINES, name, |p| {
                p.status.conditions = vec![condition];
            })
            .await?;
        self.dirty.write().await.remove(name);
        Ok(())
    }

    async fn pipeline_for(&self, name: &str) -> Result<Arc<DomainPipeline>, ProcessError> {
        if self.dirty.read().await.contains(name) {
            self.rebuild_pipeline(name).await?;
        }
        self.pipelines
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ProcessError::PipelineNotReady(name.to_string()))
    }

    /// Fills missing host capabilities from the host capabilities feature
    /// table. A stale or missing table leaves the hosts as they came.
    async fn enrich_hosts(&self, mut hosts: Vec<NovaHost>) -> Vec<NovaHost> {
        let missing: Vec<String> = hosts
            .iter()
            .filter(|h| h.hypervisor_type.is_none() && h.traits.is_empty())
            .map(|h| h.host.clone())
            .collect();
        if missing.is_empty() {
            return hosts;
        }
        let rows = match sqlx::query(
            "SELECT compute_host, hypervisor_type, traits \
             FROM feature_host_capabilities WHERE compute_host = ANY($1)",
        )
        .bind(&missing)
        .fetch_all(&self.db)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("host capability enrichment unavailable: {e}");
                return hosts;
            }
        };
        let mut capabilities: HashMap<String, (String, Vec<String>)> = HashMap::new();
        for row in rows {
            let host: String = match row.try_get("compute_host") {
                Ok(host) => host,
                Err(_) => continue,
            };
            let hypervisor_type: String = row.try_get("hypervisor_type").unwrap_or_default();
            let traits: String = row.try_get("traits").unwrap_or_default();
            let traits = traits
                .split(',')
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            capabilities.insert(host, (hypervisor_type, traits));
        }
        for host in hosts.iter_mut() {
            if let Some((hypervisor_type, traits)) = capabilities.get(&host.host) {
                host.hypervisor_type = Some(hypervisor_type.clone());
                host.traits = traits.clone();
            }
        }
        hosts
    }

    /// Decodes the domain-specific request and runs it through the decision's
    /// pipeline.
    async fn run_for(&self, decision: &Decision) -> Result<RunOutcome, ProcessError> {
        let pipeline = self
            .pipeline_for(&decision.spec.pipeline_ref.name)
            .await?;
        match (&self.domain, pipeline.as_ref()) {
            (SchedulingDomain::Nova, DomainPipeline::Nova(pipeline)) => {
                let raw = decision
                    .spec
                    .nova_raw
                    .clone()
                    .ok_or_else(|| {
                        ProcessError::Validation("decision has no novaRaw request".into())
                    })?;
                let request: ExternalSchedulerRequest = serde_json::from_value(raw)
                    .map_err(|e| ProcessError::Validation(e.to_string()))?;
                let hosts = self.enrich_hosts(request.hosts).await;
                let request = NovaRequest {
                    spec: request.spec,
                    context: request.context,
                    hosts,
                    weights: request.weights,
                };
                Ok(pipeline.run(&request).await?)
            }
            (SchedulingDomain::Pods, DomainPipeline::Pods(pipeline)) => {
                let pod_ref = decision.spec.pod_ref.clone().ok_or_else(|| {
                    ProcessError::Validation("decision has no podRef".into())
                })?;
                let pod: PodObject = self
                    .store
                    .get(kinds::PODS, &pod_ref.name)
                    .await?
                    .ok_or_else(|| {
                        ProcessError::Validation(format!("pod `{}` not found", pod_ref.name))
                    })?;
                if let Some(node) = &pod.spec.node_name {
                    // Already bound; nothing to schedule.
                    return Ok(RunOutcome {
                        ordered_hosts: vec![node.clone()],
                        target_host: Some(node.clone()),
                        ..Default::default()
                    });
                }
                let nodes: Vec<NodeObject> = self.store.list(kinds::NODES).await?;
                let request = PodRequest {
                    pod,
                    nodes: nodes.into_iter().map(|n| n.metadata.name).collect(),
                };
                Ok(pipeline.run(&request).await?)
            }
            (SchedulingDomain::Machines, DomainPipeline::Machines(pipeline)) => {
                let machine_ref = decision.spec.machine_ref.clone().ok_or_else(|| {
                    ProcessError::Validation("decision has no machineRef".into())
                })?;
                let machine: MachineObject = self
                    .store
                    .get(kinds::MACHINES, &machine_ref.name)
                    .await?
                    .ok_or_else(|| {
                        ProcessError::Validation(format!(
                            "machine `{}` not found",
                            machine_ref.name
                        ))
                    })?;
                let pools: Vec<common::workload::MachinePoolObject> =
                    self.store.list(kinds::MACHINE_POOLS).await?;
                let request = MachineRequest {
                    machine,
                    pools: pools.into_iter().map(|p| p.metadata.name).collect(),
                };
                Ok(pipeline.run(&request).await?)
            }
            _ => Err(ProcessError::Validation(format!(
                "pipeline `{}` serves a different scheduling domain",
                decision.spec.pipeline_ref.name
            ))),
        }
    }

    fn success_status(outcome: &RunOutcome, took: f64) -> DecisionStatus {
        let condition = if outcome.ordered_hosts.is_empty() {
            Condition::not_ready("NoCandidates", "no host survived the pipeline")
        } else {
            Condition::ready()
        };
        DecisionStatus {
            result: Some(DecisionResult {
                ordered_hosts: outcome.ordered_hosts.clone(),
                target_host: outcome.target_host.clone(),
                input_weights: outcome.input_weights.clone(),
                final_weights: outcome.final_weights.clone(),
                step_activations: outcome.step_activations.clone(),
                step_removed_hosts: outcome.step_removed_hosts.clone(),
            }),
            took: Some(took),
            conditions: vec![condition],
            ..Default::default()
        }
    }

    fn error_status(error: &ProcessError, took: f64) -> DecisionStatus {
        DecisionStatus {
            took: Some(took),
            conditions: vec![error.condition()],
            ..Default::default()
        }
    }

    /// Writes observable effects in order: status first, then the binding.
    async fn finish(
        &self,
        decision: &Decision,
        status: DecisionStatus,
        target: Option<&str>,
    ) -> Result<()> {
        self.store
            .update::<Decision, _>(kinds::DECISIONS, &decision.metadata.name, |d| {
                d.status = status;
            })
            .await?;
        if let Some(target) = target {
            self.bind_target(decision, target).await?;
        }
        Ok(())
    }

    /// Domain-specific binding: pods are pinned to their node, machines are
    /// patched with their pool. Idempotent when already set.
    async fn bind_target(&self, decision: &Decision, target: &str) -> Result<()> {
        match self.domain {
            SchedulingDomain::Nova => {}
            SchedulingDomain::Pods => {
                if let Some(pod_ref) = &decision.spec.pod_ref {
                    self.store
                        .update::<PodObject, _>(kinds::PODS, &pod_ref.name, |pod| {
                            if pod.spec.node_name.is_none() {
                                pod.spec.node_name = Some(target.to_string());
                            }
                        })
                        .await?;
                }
            }
            SchedulingDomain::Machines => {
                if let Some(machine_ref) = &decision.spec.machine_ref {
                    self.store
                        .update::<MachineObject, _>(
                            kinds::MACHINES,
                            &machine_ref.name,
                            |machine| {
                                if machine.spec.machine_pool_ref.is_none() {
                                    machine.spec.machine_pool_ref = Some(target.to_string());
                                }
                            },
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Reconciles one decision by name. A missing decision is not an error.
    pub async fn reconcile(&self, name: &str) -> Result<()> {
        let _guard = self.process_mu.lock().await;
        let Some(decision) = self.store.get::<Decision>(kinds::DECISIONS, name).await? else {
            return Ok(());
        };
        if !self.owns_decision(&decision) || !decision.is_pending() {
            return Ok(());
        }

        let started = Instant::now();
        let outcome = self.run_for(&decision).await;
        let took = started.elapsed().as_secs_f64();
        self.observe_run(&decision.spec.pipeline_ref.name, took);
        match outcome {
            Ok(outcome) => {
                let target = outcome.target_host.clone();
                self.finish(
                    &decision,
                    Self::success_status(&outcome, took),
                    target.as_deref(),
                )
                .await
            }
            Err(e) => {
                tracing::warn!("decision {name} failed: {e}");
                self.finish(&decision, Self::error_status(&e, took), None).await
            }
        }
    }

    /// Synchronous API path. When the pipeline persists decisions, the
    /// object is created before the run so the status update is observable;
    /// otherwise the decision stays ephemeral. On cancellation the created
    /// object is left for the watch-driven reconcile to complete.
    pub async fn process_new_decision_from_api(
        &self,
        mut decision: Decision,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, ProcessError> {
        let _guard = self.process_mu.lock().await;
        let pipeline = self
            .pipeline_for(&decision.spec.pipeline_ref.name)
            .await?;
        let persist = pipeline.create_decisions();
        if persist {
            decision.metadata.creation_timestamp = Some(Utc::now());
            self.store
                .put(kinds::DECISIONS, &decision.metadata.name, &decision)
                .await?;
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("decision {} canceled by caller", decision.metadata.name);
                return Err(ProcessError::Canceled);
            }
            outcome = self.run_for(&decision) => outcome,
        };
        let took = started.elapsed().as_secs_f64();
        self.observe_run(&decision.spec.pipeline_ref.name, took);

        match outcome {
            Ok(outcome) => {
                if persist {
                    let target = outcome.target_host.clone();
                    self.finish(
                        &decision,
                        Self::success_status(&outcome, took),
                        target.as_deref(),
                    )
                    .await?;
                }
                Ok(outcome)
            }
            Err(e) => {
                if persist {
                    self.finish(&decision, Self::error_status(&e, took), None)
                        .await?;
                }
                Err(e)
            }
        }
    }

    fn observe_run(&self, pipeline: &str, took: f64) {
        if let Some(metrics) = &self.metrics {
            metrics
                .run_duration
                .with_label_values(&[pipeline])
                .observe(took);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_status_flags_empty_candidate_sets() {
        let outcome = RunOutcome::default();
        let status = DecisionController::success_status(&outcome, 0.1);
        assert_eq!(status.conditions[0].reason, "NoCandidates");
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
        assert!(status.result.is_some());
    }

    #[test]
    fn success_status_is_ready_with_candidates() {
        let outcome = RunOutcome {
            ordered_hosts: vec!["h1".into()],
            target_host: Some("h1".into()),
            ..Default::default()
        };
        let status = DecisionController::success_status(&outcome, 0.1);
        assert_eq!(status.conditions[0].condition_type, ConditionType::Ready);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn plugin_errors_carry_the_step_name() {
        let error = ProcessError::Pipeline(PipelineError::StepRun {
            step: "host_utilization".into(),
            source: anyhow::anyhow!("boom"),
        });
        let status = DecisionController::error_status(&error, 0.1);
        assert_eq!(status.conditions[0].reason, "PluginRunError");
        assert!(status.conditions[0].message.contains("host_utilization"));
        assert!(status.result.is_none());
    }
}
