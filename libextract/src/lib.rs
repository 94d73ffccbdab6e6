//! Feature extraction.
//!
//! Extractors transform synced source tables into derived feature tables.
//! The pipeline resolves their dependency graph, executes it in topological
//! layers with intra-layer parallelism, and re-runs only the affected
//! subgraphs when a sync trigger topic fires.

pub mod extractor;
pub mod extractors;
pub mod monitor;
pub mod pipeline;
pub mod registry;
pub mod store;

pub use extractor::{ExtractError, ExtractorConfig, FeatureExtractor};
pub use monitor::{ExtractorMetrics, MonitoredExtractor};
pub use pipeline::ExtractionPipeline;
pub use registry::{ExtractorConstructor, extractor_registry};
