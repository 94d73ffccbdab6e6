//! Step scoping.
//!
//! A scope neutralizes a step's effect on out-of-scope hosts and for
//! out-of-scope request specs without changing the host-set cardinality:
//! neutralized hosts keep an entry with the no-effect activation.

use async_trait::async_trait;
use common::{SelectorAction, SelectorOperation, StepScope};
use sqlx::PgPool;

use crate::activation::no_effect;
use crate::request::PipelineRequest;
use crate::step::{PipelineError, Step, StepResult};

const SUBJECT_TRAIT: &str = "trait";
const SUBJECT_HYPERVISOR_TYPE: &str = "hypervisortype";
const SUBJECT_FLAVOR: &str = "flavor";

pub struct ScopedStep<R: PipelineRequest> {
    inner: Box<dyn Step<R>>,
    scope: StepScope,
}

impl<R: PipelineRequest> ScopedStep<R> {
    pub fn new(inner: Box<dyn Step<R>>, scope: StepScope) -> Self {
        Self { inner, scope }
    }

    /// Whether a spec selector short-circuits the whole step to no effect.
    fn spec_skips(&self, request: &R) -> bool {
        for selector in &self.scope.spec_selectors {
            if selector.subject != SUBJECT_FLAVOR {
                log::warn!(
                    "step {}: ignoring spec selector with unknown subject {}",
                    self.inner.name(),
                    selector.subject
                );
                continue;
            }
            let matches = request
                .flavor_name()
                .is_some_and(|name| name.contains(&selector.infix));
            if matches && selector.action == SelectorAction::Skip {
                return true;
            }
        }
        false
    }

    /// Applies the host selectors left-to-right, starting from all request
    /// hosts in scope.
    fn hosts_in_scope(&self, request: &R) -> Vec<String> {
        let all = request.hosts();
        let mut in_scope = all.clone();
        for selector in &self.scope.host_selectors {
            let selected: Vec<String> = match selector.subject.as_str() {
                SUBJECT_TRAIT => all
                    .iter()
                    .filter(|h| {
                        request
                            .host_traits(h)
                            .iter()
                            .any(|t| t.contains(&selector.infix))
                    })
                    .cloned()
                    .collect(),
                SUBJECT_HYPERVISOR_TYPE => all
                    .iter()
                    .filter(|h| {
                        request
                            .host_hypervisor_type(h)
                            .is_some_and(|t| t.contains(&selector.infix))
                    })
                    .cloned()
                    .collect(),
                other => {
                    log::warn!(
                        "step {}: ignoring host selector with unknown subject {other}",
                        self.inner.name()
                    );
                    continue;
                }
            };
            in_scope = match selector.operation {
                SelectorOperation::Union => {
                    let mut merged = in_scope;
                    for host in selected {
                        if !merged.contains(&host) {
                            merged.push(host);
                        }
                    }
                    merged
                }
                SelectorOperation::Intersection => in_scope
                    .into_iter()
                    .filter(|h| selected.contains(h))
                    .collect(),
                SelectorOperation::Difference => in_scope
                    .into_iter()
                    .filter(|h| !selected.contains(h))
                    .collect(),
            };
        }
        in_scope
    }
}

#[async_trait]
impl<R: PipelineRequest> Step<R> for ScopedStep<R> {
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
        let mut result = self.inner.run(request).await?;
        if self.spec_skips(request) {
            log::debug!("step {}: skipped by spec selector", self.inner.name());
            for activation in result.activations.values_mut() {
                *activation = no_effect();
            }
            return Ok(result);
        }
        let in_scope = self.hosts_in_scope(request);
        for (host, activation) in result.activations.iter_mut() {
            if !in_scope.contains(host) {
                *activation = no_effect();
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::NovaRequest;
    use common::nova::NovaHost;
    use common::{HostSelector, SpecSelector};
    use std::collections::HashMap;

    struct FixedStep {
        activations: HashMap<String, f64>,
    }

    #[async_trait]
    impl Step<NovaRequest> for FixedStep {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn init(&mut self, _: PgPool, _: serde_json::Value) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn run(&self, _: &NovaRequest) -> Result<StepResult, PipelineError> {
            Ok(StepResult {
                activations: self.activations.clone(),
                statistics: HashMap::new(),
            })
        }
    }

    fn request(hosts: Vec<NovaHost>, flavor: &str) -> NovaRequest {
        NovaRequest {
            spec: serde_json::json!({"data": {"flavor": {"data": {"name": flavor}}}}),
            context: serde_json::Value::Null,
            hosts,
            weights: HashMap::new(),
        }
    }

    fn host(name: &str, traits: &[&str]) -> NovaHost {
        NovaHost {
            host: name.to_string(),
            hypervisor_type: None,
            traits: traits.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn scoped(activations: &[(&str, f64)], scope: StepScope) -> ScopedStep<NovaRequest> {
        ScopedStep::new(
            Box::new(FixedStep {
                activations: activations
                    .iter()
                    .map(|(h, a)| (h.to_string(), *a))
                    .collect(),
            }),
            scope,
        )
    }

    #[tokio::test]
    async fn empty_scope_passes_activations_through() {
        let step = scoped(&[("h1", 1.0), ("h2", -2.0)], StepScope::default());
        let req = request(vec![host("h1", &[]), host("h2", &[])], "m1");
        let result = step.run(&req).await.unwrap();
        assert_eq!(result.activations["h1"], 1.0);
        assert_eq!(result.activations["h2"], -2.0);
    }

    #[tokio::test]
    async fn trait_intersection_neutralizes_other_hosts() {
        let scope = StepScope {
            host_selectors: vec![HostSelector {
                subject: "trait".into(),
                infix: "TRAIT_A".into(),
                operation: SelectorOperation::Intersection,
            }],
            spec_selectors: vec![],
        };
        let step = scoped(&[("h1", 1.0), ("h2", 2.0), ("h3", 3.0)], scope);
        let req = request(
            vec![
                host("h1", &["TRAIT_A", "TRAIT_B"]),
                host("h2", &["TRAIT_B"]),
                host("h3", &["TRAIT_C"]),
            ],
            "m1",
        );
        let result = step.run(&req).await.unwrap();
        assert_eq!(result.activations["h1"], 1.0);
        assert_eq!(result.activations["h2"], 0.0);
        assert_eq!(result.activations["h3"], 0.0);
        assert_eq!(result.activations.len(), 3);
    }

    #[tokio::test]
    async fn difference_removes_selected_hosts_from_scope() {
        let scope = StepScope {
            host_selectors: vec![HostSelector {
                subject: "trait".into(),
                infix: "TRAIT_A".into(),
                operation: SelectorOperation::Difference,
            }],
            spec_selectors: vec![],
        };
        let step = scoped(&[("h1", 1.0), ("h2", 2.0)], scope);
        let req = request(vec![host("h1", &["TRAIT_A"]), host("h2", &[])], "m1");
        let result = step.run(&req).await.unwrap();
        assert_eq!(result.activations["h1"], 0.0);
        assert_eq!(result.activations["h2"], 2.0);
    }

    #[tokio::test]
    async fn flavor_skip_neutralizes_every_host() {
        let scope = StepScope {
            host_selectors: vec![],
            spec_selectors: vec![SpecSelector {
                subject: "flavor".into(),
                infix: "special".into(),
                action: SelectorAction::Skip,
            }],
        };
        let step = scoped(&[("h1", 1.0), ("h2", 2.0)], scope);
        let req = request(vec![host("h1", &[]), host("h2", &[])], "special-flavor");
        let result = step.run(&req).await.unwrap();
        assert_eq!(result.activations["h1"], 0.0);
        assert_eq!(result.activations["h2"], 0.0);
    }

    #[tokio::test]
    async fn unknown_subject_is_ignored() {
        let scope = StepScope {
            host_selectors: vec![HostSelector {
                subject: "zone".into(),
                infix: "az1".into(),
                operation: SelectorOperation::Intersection,
            }],
            spec_selectors: vec![],
        };
        let step = scoped(&[("h1", 1.0)], scope);
        let req = request(vec![host("h1", &[])], "m1");
        let result = step.run(&req).await.unwrap();
        assert_eq!(result.activations["h1"], 1.0);
    }
}
