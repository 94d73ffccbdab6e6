//! Extractor instrumentation.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use sqlx::PgPool;

use crate::extractor::{ExtractError, FeatureExtractor};

#[derive(Clone)]
pub struct ExtractorMetrics {
    pub run_duration: HistogramVec,
    pub errors: IntCounterVec,
}

impl ExtractorMetrics {
    pub fn new(
        registry: &Registry,
        const_labels: HashMap<String, String>,
    ) -> prometheus::Result<Self> {
        let run_duration = HistogramVec::new(
            HistogramOpts::new(
                "cortex_extractor_duration_seconds",
                "Duration of one feature extraction run",
            )
            .const_labels(const_labels.clone()),
            &["extractor"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "cortex_extractor_errors_total",
                "Failed feature extraction runs",
            )
            .const_labels(const_labels),
            &["extractor"],
        )?;
        registry.register(Box::new(run_duration.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        Ok(Self {
            run_duration,
            errors,
        })
    }
}

/// Shim recording per-run duration and error counts around an extractor.
pub struct MonitoredExtractor {
    inner: Box<dyn FeatureExtractor>,
    metrics: Option<ExtractorMetrics>,
}

impl MonitoredExtractor {
    pub fn new(inner: Box<dyn FeatureExtractor>, metrics: Option<ExtractorMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl FeatureExtractor for MonitoredExtractor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn table(&self) -> &str {
        self.inner.table()
    }

    fn triggers(&self) -> Vec<String> {
        self.inner.triggers()
    }

    fn dependencies(&self) -> Vec<String> {
        self.inner.dependencies()
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), ExtractError> {
        self.inner.init(db, opts).await
    }

    async fn extract(&self) -> Result<u64, ExtractError> {
        let started = Instant::now();
        let result = self.inner.extract().await;
        if let Some(metrics) = &self.metrics {
            metrics
                .run_duration
                .with_label_values(&[self.inner.name()])
                .observe(started.elapsed().as_secs_f64());
            if result.is_err() {
                metrics
                    .errors
                    .with_label_values(&[self.inner.name()])
                    .inc();
            }
        }
        result
    }
}
