//! Inter-step invariant validation.

use async_trait::async_trait;
use common::DisabledValidations;
use sqlx::PgPool;

use crate::request::PipelineRequest;
use crate::step::{PipelineError, Step, StepResult};

/// Asserts that a step returns one activation per request host. Filter-type
/// steps drop hosts on purpose and disable the validation through their
/// pipeline step reference.
pub struct ValidatedStep<R: PipelineRequest> {
    inner: Box<dyn Step<R>>,
    disabled: DisabledValidations,
}

impl<R: PipelineRequest> ValidatedStep<R> {
    pub fn new(inner: Box<dyn Step<R>>, disabled: DisabledValidations) -> Self {
        Self { inner, disabled }
    }
}

#[async_trait]
impl<R: PipelineRequest> Step<R> for ValidatedStep<R> {
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
        let result = self.inner.run(request).await?;
        let want = request.hosts().len();
        if !self.disabled.same_host_number_in_out && result.activations.len() != want {
            return Err(PipelineError::HostCountChanged {
                step: self.inner.name().to_string(),
                got: result.activations.len(),
                want,
            });
        }
        Ok(result)
    }
}
