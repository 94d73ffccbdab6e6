//! The feature extraction pipeline.
//!
//! Owns the configured extractors, resolves their dependency graph once at
//! startup, and executes it layer by layer: all extractors of a layer run
//! concurrently, the next layer starts when the whole layer finished.
//! Trigger topics re-run only the subgraphs whose frontier declares the
//! topic; subgraphs run serially and shared ancestors run once per
//! subgraph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use libbus::{MessageBus, topics};
use libdag::{DependencyGraph, GraphNode};
use sqlx::PgPool;

use crate::extractor::{ExtractError, ExtractorConfig, FeatureExtractor};
use crate::monitor::{ExtractorMetrics, MonitoredExtractor};
use crate::registry::extractor_registry;

#[derive(Clone)]
struct ExtractorNode {
    name: String,
    deps: Vec<String>,
    index: usize,
}

impl GraphNode for ExtractorNode {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn predecessors(&self) -> Vec<String> {
        self.deps.clone()
    }
}

struct Entry {
    extractor: MonitoredExtractor,
    publish_on_error: bool,
}

pub struct ExtractionPipeline {
    entries: Vec<Entry>,
    /// Full execution order for unconditional periodic runs.
    full_order: Vec<Vec<usize>>,
    /// Per-topic execution orders: one layered order per subgraph.
    trigger_orders: HashMap<String, Vec<Vec<Vec<usize>>>>,
    bus: Arc<dyn MessageBus>,
}

impl std::fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ExtractionPipeline {
    /// Builds the pipeline from configuration: resolves each extractor in
    /// the static registry, wraps it with the monitor shim, initializes it,
    /// and precomputes the full and per-topic execution orders.
    pub async fn new(
        configs: &[ExtractorConfig],
        db: PgPool,
        bus: Arc<dyn MessageBus>,
        metrics: Option<ExtractorMetrics>,
    ) -> Result<Arc<Self>, ExtractError> {
        let registry = extractor_registry();
        let mut extractors = Vec::with_capacity(configs.len());
        for config in configs {
            let constructor = registry
                .get(config.name.as_str())
                .ok_or_else(|| ExtractError::UnknownExtractor(config.name.clone()))?;
            extractors.push((constructor(), config.clone()));
        }
        Self::from_extractors(extractors, db, bus, metrics).await
    }

    /// Like [`ExtractionPipeline::new`] but with caller-supplied extractor
    /// instances instead of registry names.
    pub async fn from_extractors(
        extractors: Vec<(Box<dyn FeatureExtractor>, ExtractorConfig)>,
        db: PgPool,
        bus: Arc<dyn MessageBus>,
        metrics: Option<ExtractorMetrics>,
    ) -> Result<Arc<Self>, ExtractError> {
        let mut entries = Vec::with_capacity(extractors.len());
        for (extractor, config) in extractors {
            let mut monitored = MonitoredExtractor::new(extractor, metrics.clone());
            monitored.init(db.clone(), config.opts.clone()).await?;
            entries.push(Entry {
                extractor: monitored,
                publish_on_error: config.publish_on_error,
            });
        }

        // Two extractors writing the same table could interleave within a
        // layer; a single producer per table is a config invariant.
        let mut producers: HashMap<String, String> = HashMap::new();
        for entry in &entries {
            let table = entry.extractor.table().to_string();
            let name = entry.extractor.name().to_string();
            if let Some(first) = producers.insert(table.clone(), name.clone()) {
                return Err(ExtractError::DuplicateProducer {
                    table,
                    first,
                    second: name,
                });
            }
        }

        let nodes: Vec<ExtractorNode> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| ExtractorNode {
                name: entry.extractor.name().to_string(),
                deps: entry.extractor.dependencies(),
                index,
            })
            .collect();
        let graph = DependencyGraph::new(nodes)?;
        let full_order: Vec<Vec<usize>> = graph
            .resolve()?
            .into_iter()
            .map(|layer| layer.into_iter().map(|n| n.index).collect())
            .collect();

        let all_topics: HashSet<String> = entries
            .iter()
            .flat_map(|e| e.extractor.triggers())
            .collect();
        let mut trigger_orders = HashMap::new();
        for topic in all_topics {
            let mut orders = Vec::new();
            for subgraph in
                graph.distinct_subgraphs(|n| entries[n.index].extractor.triggers().contains(&topic))
            {
                let order: Vec<Vec<usize>> = subgraph
                    .resolve()?
                    .into_iter()
                    .map(|layer| layer.into_iter().map(|n| n.index).collect())
                    .collect();
                orders.push(order);
            }
            trigger_orders.insert(topic, orders);
        }

        Ok(Arc::new(Self {
            entries,
            full_order,
            trigger_orders,
            bus,
        }))
    }

    /// Subscribes to every declared trigger topic. The bus dispatches each
    /// message on its own task, so the subgraph run never blocks delivery.
    pub async fn start(self: Arc<Self>) {
        for topic in self.trigger_orders.keys() {
            let pipeline = Arc::clone(&self);
            self.bus
                .subscribe(
                    topic,
                    Arc::new(move |topic, _payload| {
                        let pipeline = Arc::clone(&pipeline);
                        Box::pin(async move {
                            pipeline.run_trigger(&topic).await;
                        })
                    }),
                )
                .await;
        }
    }

    /// Unconditional run of the whole graph, layer by layer. Extractor
    /// errors are logged and do not abort subsequent layers.
    pub async fn run_all(&self) {
        for layer in &self.full_order {
            self.run_layer(layer).await;
        }
    }

    /// Re-runs the subgraphs affected by a trigger topic.
    pub async fn run_trigger(&self, topic: &str) {
        let Some(orders) = self.trigger_orders.get(topic) else {
            log::trace!("no extractors triggered by topic {topic}");
            return;
        };
        log::debug!("topic {topic}: refreshing {} subgraph(s)", orders.len());
        for order in orders {
            for layer in order {
                self.run_layer(layer).await;
            }
        }
    }

    async fn run_layer(&self, layer: &[usize]) {
        join_all(layer.iter().map(|&index| self.run_one(index))).await;
    }

    async fn run_one(&self, index: usize) {
        let entry = &self.entries[index];
        let name = entry.extractor.name().to_string();
        match entry.extractor.extract().await {
            Ok(rows) => {
                log::debug!("extractor {name}: wrote {rows} feature rows");
                self.bus
                    .publish(&topics::features_updated(&name), serde_json::json!({}))
                    .await;
            }
            Err(e) => {
                // A persistent failure surfaces as a stale feature table;
                // downstream steps fall back to no-effect activations.
                log::error!("extractor {name} failed: {e}");
                if entry.publish_on_error {
                    self.bus
                        .publish(&topics::features_updated(&name), serde_json::json!({}))
                        .await;
                }
            }
        }
    }

    /// Topics the pipeline reacts to.
    pub fn trigger_topics(&self) -> Vec<String> {
        self.trigger_orders.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use libbus::LocalBus;
    use tokio::sync::Mutex;

    struct RecordingExtractor {
        name: &'static str,
        table: &'static str,
        deps: Vec<&'static str>,
        triggers: Vec<String>,
        runs: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl FeatureExtractor for RecordingExtractor {
        fn name(&self) -> &str {
            self.name
        }

        fn table(&self) -> &str {
            self.table
        }

        fn triggers(&self) -> Vec<String> {
            self.triggers.clone()
        }

        fn dependencies(&self) -> Vec<String> {
            self.deps.iter().map(|d| d.to_string()).collect()
        }

        async fn init(&mut self, _: PgPool, _: serde_json::Value) -> Result<(), ExtractError> {
            Ok(())
        }

        async fn extract(&self) -> Result<u64, ExtractError> {
            self.runs.lock().await.push(self.name.to_string());
            if self.fail {
                return Err(ExtractError::UnknownExtractor("boom".into()));
            }
            Ok(1)
        }
    }

    fn pool() -> PgPool {
        PgPool::connect_lazy("postgres://cortex@localhost/cortex").unwrap()
    }

    fn recording(
        name: &'static str,
        deps: &[&'static str],
        triggers: &[&str],
        runs: &Arc<Mutex<Vec<String>>>,
    ) -> (Box<dyn FeatureExtractor>, ExtractorConfig) {
        (
            Box::new(RecordingExtractor {
                name,
                table: Box::leak(format!("feature_{name}").into_boxed_str()),
                deps: deps.to_vec(),
                triggers: triggers.iter().map(|t| t.to_string()).collect(),
                runs: runs.clone(),
                fail: false,
            }),
            ExtractorConfig::named(name),
        )
    }

    async fn diamond(runs: &Arc<Mutex<Vec<String>>>) -> Arc<ExtractionPipeline> {
        ExtractionPipeline::from_extractors(
            vec![
                recording("a", &[], &[], runs),
                recording("b", &["a"], &["T"], runs),
                recording("c", &["a"], &["T"], runs),
                recording("d", &["b", "c"], &[], runs),
            ],
            pool(),
            Arc::new(LocalBus::new()),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn full_run_respects_layering() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let pipeline = diamond(&runs).await;
        pipeline.run_all().await;

        let log = runs.lock().await.clone();
        assert_eq!(log.len(), 4);
        assert_eq!(log[0], "a");
        assert_eq!(log[3], "d");
        assert!(log[1..3].contains(&"b".to_string()));
        assert!(log[1..3].contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn trigger_runs_each_subgraph_with_its_ancestors() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let pipeline = diamond(&runs).await;
        pipeline.run_trigger("T").await;

        // Two subgraphs rooted at b and c; the shared ancestor a runs once
        // per subgraph and d is not refreshed at all.
        let log = runs.lock().await.clone();
        assert_eq!(log, vec!["a", "b", "a", "c"]);
    }

    #[tokio::test]
    async fn unrelated_topic_runs_nothing() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let pipeline = diamond(&runs).await;
        pipeline.run_trigger("unrelated").await;
        assert!(runs.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failing_extractor_does_not_abort_later_layers() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let failing: Box<dyn FeatureExtractor> = Box::new(RecordingExtractor {
            name: "a",
            table: "feature_a",
            deps: vec![],
            triggers: vec![],
            runs: runs.clone(),
            fail: true,
        });
        let pipeline = ExtractionPipeline::from_extractors(
            vec![
                (failing, ExtractorConfig::named("a")),
                recording("b", &["a"], &[], &runs),
            ],
            pool(),
            Arc::new(LocalBus::new()),
            None,
        )
        .await
        .unwrap();
        pipeline.run_all().await;
        assert_eq!(runs.lock().await.clone(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn duplicate_table_producer_is_rejected() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let (first, first_config) = recording("a", &[], &[], &runs);
        let second = Box::new(RecordingExtractor {
            name: "b",
            table: "feature_a",
            deps: vec![],
            triggers: vec![],
            runs: runs.clone(),
            fail: false,
        });
        let err = ExtractionPipeline::from_extractors(
            vec![
                (first, first_config),
                (second, ExtractorConfig::named("b")),
            ],
            pool(),
            Arc::new(LocalBus::new()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractError::DuplicateProducer { .. }));
    }

    #[tokio::test]
    async fn unknown_extractor_name_is_rejected() {
        let err = ExtractionPipeline::new(
            &[ExtractorConfig::named("does_not_exist")],
            pool(),
            Arc::new(LocalBus::new()),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractError::UnknownExtractor(name) if name == "does_not_exist"));
    }
}
