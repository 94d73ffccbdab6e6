//! Step and pipeline instrumentation.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use prometheus::{GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use sqlx::PgPool;

use crate::request::PipelineRequest;
use crate::step::{PipelineError, Step, StepResult};

/// Prometheus instruments shared by all monitored steps of a process.
/// Extra label pairs from the configuration are injected as const labels.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub step_duration: HistogramVec,
    pub step_activation: GaugeVec,
    pub step_removed_hosts: HistogramVec,
    pub run_duration: HistogramVec,
}

impl PipelineMetrics {
    pub fn new(
        registry: &Registry,
        const_labels: HashMap<String, String>,
    ) -> prometheus::Result<Self> {
        let step_duration = HistogramVec::new(
            HistogramOpts::new(
                "cortex_scheduler_step_duration_seconds",
                "Duration of one scheduling step run",
            )
            .const_labels(const_labels.clone()),
            &["step"],
        )?;
        let step_activation = GaugeVec::new(
            Opts::new(
                "cortex_scheduler_step_activation",
                "Last activation a step emitted for a host",
            )
            .const_labels(const_labels.clone()),
            &["step", "host"],
        )?;
        let step_removed_hosts = HistogramVec::new(
            HistogramOpts::new(
                "cortex_scheduler_step_removed_hosts",
                "Number of hosts a step removed from the candidate set",
            )
            .const_labels(const_labels.clone()),
            &["step"],
        )?;
        let run_duration = HistogramVec::new(
            HistogramOpts::new(
                "cortex_scheduler_pipeline_duration_seconds",
                "Duration of one full pipeline run",
            )
            .const_labels(const_labels),
            &["pipeline"],
        )?;
        registry.register(Box::new(step_duration.clone()))?;
        registry.register(Box::new(step_activation.clone()))?;
        registry.register(Box::new(step_removed_hosts.clone()))?;
        registry.register(Box::new(run_duration.clone()))?;
        Ok(Self {
            step_duration,
            step_activation,
            step_removed_hosts,
            run_duration,
        })
    }
}

/// Records per-step duration, per-host activation deltas, and the number of
/// removed hosts.
pub struct MonitoredStep<R: PipelineRequest> {
    inner: Box<dyn Step<R>>,
    metrics: PipelineMetrics,
}

impl<R: PipelineRequest> MonitoredStep<R> {
    pub fn new(inner: Box<dyn Step<R>>, metrics: PipelineMetrics) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl<R: PipelineRequest> Step<R> for MonitoredStep<R> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn triggers(&self) -> Vec<String> {
        self.inner.triggers()
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), PipelineError> {
        self.inner.init(db, opts).await
    }

    async fn run(&self, request: &R) -> Result<StepResult, PipelineError> {
        let started = Instant::now();
        let result = self.inner.run(request).await?;
        self.metrics
            .step_duration
            .with_label_values(&[self.inner.name()])
            .observe(started.elapsed().as_secs_f64());
        for (host, activation) in &result.activations {
            self.metrics
                .step_activation
                .with_label_values(&[self.inner.name(), host])
                .set(*activation);
        }
        let removed = request.hosts().len().saturating_sub(result.activations.len());
        self.metrics
            .step_removed_hosts
            .with_label_values(&[self.inner.name()])
            .observe(removed as f64);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::PodRequest;
    use common::ObjectMeta;
    use common::workload::PodObject;

    struct HalfStep;

    #[async_trait]
    impl Step<PodRequest> for HalfStep {
        fn name(&self) -> &str {
            "half"
        }

        async fn init(&mut self, _: PgPool, _: serde_json::Value) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn run(&self, request: &PodRequest) -> Result<StepResult, PipelineError> {
            let mut activations: HashMap<String, f64> =
                request.hosts().into_iter().map(|h| (h, 1.0)).collect();
            activations.remove("n2");
            Ok(StepResult {
                activations,
                statistics: HashMap::new(),
            })
        }
    }

    #[tokio::test]
    async fn records_duration_activation_and_removed_count() {
        let registry = Registry::new();
        let metrics = PipelineMetrics::new(&registry, HashMap::new()).unwrap();
        let step = MonitoredStep::new(Box::new(HalfStep), metrics.clone());
        let request = PodRequest {
            pod: PodObject {
                metadata: ObjectMeta::named("default/web-0"),
                spec: Default::default(),
            },
            nodes: vec!["n1".into(), "n2".into()],
        };
        step.run(&request).await.unwrap();

        assert_eq!(
            metrics
                .step_activation
                .with_label_values(&["half", "n1"])
                .get(),
            1.0
        );
        assert_eq!(
            metrics
                .step_duration
                .with_label_values(&["half"])
                .get_sample_count(),
            1
        );
        assert_eq!(
            metrics
                .step_removed_hosts
                .with_label_values(&["half"])
                .get_sample_sum(),
            1.0
        );
    }
}
