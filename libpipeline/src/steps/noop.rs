use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;

use crate::request::PipelineRequest;
use crate::step::{PipelineError, Step, StepResult, decode_opts};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoopOpts {}

/// Influences no host. Useful as a pipeline placeholder and in tests.
#[derive(Debug, Default)]
pub struct NoopStep;

#[async_trait]
impl<R: PipelineRequest> Step<R> for NoopStep {
    fn name(&self) -> &str {
        "noop"
    }

    async fn init(&mut self, _db: PgPool, opts: serde_json::Value) -> Result<(), PipelineError> {
        decode_opts::<NoopOpts>("noop", &opts)?;
        Ok(())
    }

    async fn run(&self, request: &R) -> Result<StepResult, PipelineError> {
        Ok(StepResult::no_effect(&request.hosts()))
    }
}
