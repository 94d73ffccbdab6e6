use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use thiserror::Error;

use crate::request::PipelineRequest;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown step `{0}`")]
    UnknownStep(String),
    #[error("invalid options for step `{step}`: {reason}")]
    InvalidOptions { step: String, reason: String },
    #[error("invalid scaling bounds: lower and upper input bound are equal")]
    InvalidBounds,
    #[error("step `{step}` changed host count: got {got} activations for {want} hosts")]
    HostCountChanged {
        step: String,
        got: usize,
        want: usize,
    },
    #[error("step `{step}` failed: {source}")]
    StepRun {
        step: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Auxiliary per-step observability values.
#[derive(Debug, Clone, Default)]
pub struct StepStatistics {
    pub unit: String,
    pub hosts: HashMap<String, f64>,
}

/// Output of one step run.
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    /// Per-host activation. Before scoping, the keys must equal the
    /// request's host set; filter-type steps may return a subset when the
    /// host-count validation is disabled for them.
    pub activations: HashMap<String, f64>,
    pub statistics: HashMap<String, StepStatistics>,
}

impl StepResult {
    /// A result that influences no host.
    pub fn no_effect(hosts: &[String]) -> Self {
        Self {
            activations: hosts
                .iter()
                .map(|h| (h.clone(), crate::activation::no_effect()))
                .collect(),
            statistics: HashMap::new(),
        }
    }
}

/// A filter or weigher step.
///
/// Steps are initialized once with a database handle and their options blob
/// and must be pure over (request, feature tables) during `run`: no writes
/// to shared state.
#[async_trait]
pub trait Step<R: PipelineRequest>: Send + Sync {
    fn name(&self) -> &str;

    /// Topics whose publication makes the step's inputs stale.
    fn triggers(&self) -> Vec<String> {
        Vec::new()
    }

    async fn init(&mut self, db: PgPool, opts: serde_json::Value) -> Result<(), PipelineError>;

    async fn run(&self, request: &R) -> Result<StepResult, PipelineError>;
}

/// Decodes a step's options blob into its typed options. Unknown fields are
/// rejected by the target type (`deny_unknown_fields`); a null blob decodes
/// as an empty object.
pub fn decode_opts<T: DeserializeOwned>(
    step: &str,
    opts: &serde_json::Value,
) -> Result<T, PipelineError> {
    let value = if opts.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        opts.clone()
    };
    serde_json::from_value(value).map_err(|e| PipelineError::InvalidOptions {
        step: step.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    #[serde(deny_unknown_fields, default)]
    struct DemoOpts {
        weight: f64,
    }

    #[test]
    fn null_opts_decode_to_defaults() {
        let opts: DemoOpts = decode_opts("demo", &serde_json::Value::Null).unwrap();
        assert_eq!(opts.weight, 0.0);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = decode_opts::<DemoOpts>("demo", &serde_json::json!({"weihgt": 1.0})).unwrap_err();
        match err {
            PipelineError::InvalidOptions { step, .. } => assert_eq!(step, "demo"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn no_effect_covers_every_host() {
        let hosts = vec!["h1".to_string(), "h2".to_string()];
        let result = StepResult::no_effect(&hosts);
        assert_eq!(result.activations.len(), 2);
        assert_eq!(result.activations["h1"], 0.0);
    }
}
