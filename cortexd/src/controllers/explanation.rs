//! Decision explanation.
//!
//! Enriches decided decisions with their per-resource history and a
//! deterministic, human-auditable explanation of why the winner won:
//! winner gap, the minimal set of steps that decided the ranking, the
//! hosts that were filtered out and by which steps, and the chain of
//! earlier decisions for the same resource.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use common::{Decision, ObjectRef};
use etcd_client::EventType;
use serde::Serialize;

use crate::store::kinds;
use crate::store::multicluster::MulticlusterStore;

/// The structured explanation serialized into the decision status. All
/// containers are ordered, so explaining the same decision twice yields
/// byte-equal strings.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationContext {
    pub resource_id: String,
    pub target_host: Option<String>,
    /// Final-score difference between the winner and the runner-up.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_gap: Option<f64>,
    /// Minimal set of steps whose removal would change the winner.
    pub critical_steps: Vec<String>,
    /// Hosts removed from the candidate set, with the removing steps.
    pub deleted_hosts: BTreeMap<String, Vec<String>>,
    /// Winner by input weights alone, and whether the pipeline changed it.
    pub input_order_winner: Option<String>,
    pub winner_changed_by_pipeline: bool,
    /// Earlier decisions for the same resource, chronological.
    pub chain: Vec<ChainSegment>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainSegment {
    pub decision: String,
    pub target_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub took: Option<f64>,
}

/// Winner under the pipeline's ranking rules, with a subset of steps
/// ignored. Activation sums and filter intersections are order-free, so
/// the winner only depends on which steps participate.
fn winner_without(
    result: &common::DecisionResult,
    ignored: &[&str],
) -> Option<String> {
    let mut weights = result.input_weights.clone();
    for (step, activations) in &result.step_activations {
        if ignored.contains(&step.as_str()) {
            continue;
        }
        let removed = result
            .step_removed_hosts
            .get(step)
            .cloned()
            .unwrap_or_default();
        weights = weights
            .into_iter()
            .filter(|(host, _)| !removed.contains(host))
            .map(|(host, weight)| {
                let delta = activations.get(&host).copied().unwrap_or(0.0);
                (host, weight + delta)
            })
            .collect();
    }
    weights
        .iter()
        .max_by(|(ah, aw), (bh, bw)| aw.total_cmp(bw).then_with(|| bh.cmp(ah)))
        .map(|(host, _)| host.clone())
}

/// The minimal step subset whose removal changes the winner, searched in
/// ascending subset size. Pipelines are short; past 16 steps only single
/// steps are tried.
fn critical_steps(result: &common::DecisionResult) -> Vec<String> {
    let steps: Vec<&str> = result.step_activations.keys().map(String::as_str).collect();
    let baseline = winner_without(result, &[]);
    if steps.is_empty() || baseline.is_none() {
        return Vec::new();
    }
    if steps.len() > 16 {
        for step in &steps {
            if winner_without(result, &[step]) != baseline {
                return vec![step.to_string()];
            }
        }
        return Vec::new();
    }
    let mut masks: Vec<u32> = (1..(1u32 << steps.len())).collect();
    masks.sort_by_key(|m| (m.count_ones(), *m));
    for mask in masks {
        let ignored: Vec<&str> = steps
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, s)| *s)
            .collect();
        if winner_without(result, &ignored) != baseline {
            return ignored.into_iter().map(str::to_string).collect();
        }
    }
    Vec::new()
}

/// Builds the explanation context for a decided decision and its
/// chronological history.
pub fn build_explanation(decision: &Decision, history: &[Decision]) -> ExplanationContext {
    let result = decision.status.result.clone().unwrap_or_default();

    let winner_gap = {
        let mut scores: Vec<f64> = result.final_weights.values().copied().collect();
        scores.sort_by(|a, b| b.total_cmp(a));
        match scores.as_slice() {
            [first, second, ..] => Some(first - second),
            _ => None,
        }
    };

    let mut deleted_hosts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (step, hosts) in &result.step_removed_hosts {
        for host in hosts {
            deleted_hosts
                .entry(host.clone())
                .or_default()
                .push(step.clone());
        }
    }
    for steps in deleted_hosts.values_mut() {
        steps.sort();
    }

    let input_order_winner = result
        .input_weights
        .iter()
        .max_by(|(ah, aw), (bh, bw)| aw.total_cmp(bw).then_with(|| bh.cmp(ah)))
        .map(|(host, _)| host.clone());

    ExplanationContext {
        resource_id: decision.spec.resource_id.clone(),
        target_host: result.target_host.clone(),
        winner_gap,
        critical_steps: critical_steps(&result),
        deleted_hosts,
        input_order_winner: input_order_winner.clone(),
        winner_changed_by_pipeline: input_order_winner != result.target_host,
        chain: history
            .iter()
            .map(|earlier| ChainSegment {
                decision: earlier.metadata.name.clone(),
                target_host: earlier
                    .status
                    .result
                    .as_ref()
                    .and_then(|r| r.target_host.clone()),
                took: earlier.status.took,
            })
            .collect(),
    }
}

pub struct ExplanationController {
    store: Arc<MulticlusterStore>,
    operator: String,
}

impl ExplanationController {
    pub fn new(store: Arc<MulticlusterStore>, operator: String) -> Arc<Self> {
        Arc::new(Self { store, operator })
    }

    /// Explains the backlog, then watches for freshly decided decisions.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let (decisions, rev) = self
            .store
            .snapshot_with_rev::<Decision>(kinds::DECISIONS)
            .await?;
        for decision in decisions {
            if self.wants(&decision) {
                if let Err(e) = self.explain(&decision.metadata.name).await {
                    tracing::warn!("explaining decision {} failed: {e}", decision.metadata.name);
                }
            }
        }

        let (watcher, mut stream) = self.store.watch_kind(kinds::DECISIONS, rev + 1).await?;
        let controller = Arc::clone(&self);
        tokio::spawn(async move {
            let _watcher = watcher;
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            if event.event_type() != EventType::Put {
                                continue;
                            }
                            let Some(kv) = event.kv() else { continue };
                            let Ok(decision) = serde_json::from_slice::<Decision>(kv.value())
                            else {
                                continue;
                            };
                            if controller.wants(&decision) {
                                if let Err(e) =
                                    controller.explain(&decision.metadata.name).await
                                {
                                    tracing::warn!(
                                        "explaining decision {} failed: {e}",
                                        decision.metadata.name
                                    );
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => tracing::warn!("decision watch error: {e}"),
                }
            }
        });
        Ok(())
    }

    fn wants(&self, decision: &Decision) -> bool {
        decision.spec.operator == self.operator
            && decision.status.result.is_some()
            && decision.status.explanation.is_none()
    }

    /// Reconstructs the decision chain and writes history, precedence, and
    /// the rendered explanation.
    pub async fn explain(&self, name: &str) -> Result<()> {
        let Some(decision) = self.store.get::<Decision>(kinds::DECISIONS, name).await? else {
            return Ok(());
        };
        if !self.wants(&decision) {
            return Ok(());
        }

        let all: Vec<Decision> = self.store.list(kinds::DECISIONS).await?;
        let mut history: Vec<Decision> = all
            .into_iter()
            .filter(|other| {
                other.metadata.name != decision.metadata.name
                    && other.spec.resource_id == decision.spec.resource_id
                    && other.metadata.creation_timestamp <= decision.metadata.creation_timestamp
            })
            .collect();
        history.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });

        let context = build_explanation(&decision, &history);
        let explanation = serde_json::to_string(&context)?;
        let refs: Vec<ObjectRef> = history
            .iter()
            .map(|d| ObjectRef::new(kinds::DECISIONS, &d.metadata.name))
            .collect();
        let precedence = refs.len() as u32;

        self.store
            .update::<Decision, _>(kinds::DECISIONS, name, |d| {
                d.status.history = refs;
                d.status.precedence = Some(precedence);
                d.status.explanation = Some(explanation);
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::meta::{ObjectMeta, SchedulingDomain};
    use common::{DecisionResult, DecisionSpec, DecisionStatus, PipelineRef};

    fn decided(
        name: &str,
        resource: &str,
        input: &[(&str, f64)],
        steps: &[(&str, &[(&str, f64)])],
        removed: &[(&str, &[&str])],
    ) -> Decision {
        let input_weights: BTreeMap<String, f64> =
            input.iter().map(|(h, w)| (h.to_string(), *w)).collect();
        let step_activations: BTreeMap<String, BTreeMap<String, f64>> = steps
            .iter()
            .map(|(s, acts)| {
                (
                    s.to_string(),
                    acts.iter().map(|(h, a)| (h.to_string(), *a)).collect(),
                )
            })
            .collect();
        let step_removed_hosts: BTreeMap<String, Vec<String>> = removed
            .iter()
            .map(|(s, hosts)| {
                (
                    s.to_string(),
                    hosts.iter().map(|h| h.to_string()).collect(),
                )
            })
            .collect();

        // Final weights under the runtime's accumulation rules.
        let mut weights = input_weights.clone();
        for (step, activations) in &step_activations {
            let removed = step_removed_hosts.get(step).cloned().unwrap_or_default();
            weights = weights
                .into_iter()
                .filter(|(host, _)| !removed.contains(host))
                .map(|(host, weight)| {
                    let delta = activations.get(&host).copied().unwrap_or(0.0);
                    (host, weight + delta)
                })
                .collect();
        }
        let mut ordered: Vec<String> = weights.keys().cloned().collect();
        ordered.sort_by(|a, b| weights[b].total_cmp(&weights[a]).then_with(|| a.cmp(b)));

        Decision {
            metadata: ObjectMeta::named(name),
            spec: DecisionSpec {
                scheduling_domain: SchedulingDomain::Nova,
                operator: "cortex".into(),
                pipeline_ref: PipelineRef {
                    name: "nova-external-scheduler-kvm".into(),
                },
                resource_id: resource.into(),
                nova_raw: None,
                pod_ref: None,
                machine_ref: None,
                reservation: None,
            },
            status: DecisionStatus {
                result: Some(DecisionResult {
                    target_host: ordered.first().cloned(),
                    ordered_hosts: ordered,
                    input_weights,
                    final_weights: weights,
                    step_activations,
                    step_removed_hosts,
                }),
                took: Some(0.01),
                ..Default::default()
            },
        }
    }

    #[test]
    fn winner_gap_is_top_minus_second() {
        let decision = decided(
            "d1",
            "srv-1",
            &[("h1", 0.0), ("h2", 0.0)],
            &[("w1", &[("h1", 1.0), ("h2", 0.25)])],
            &[],
        );
        let context = build_explanation(&decision, &[]);
        assert_eq!(context.target_host.as_deref(), Some("h1"));
        assert_eq!(context.winner_gap, Some(0.75));
    }

    #[test]
    fn critical_step_is_the_one_that_decided_the_winner() {
        // Input order favors h2; w1 flips the winner to h1, w2 is neutral.
        let decision = decided(
            "d1",
            "srv-1",
            &[("h1", 0.0), ("h2", 0.5)],
            &[
                ("w1", &[("h1", 2.0), ("h2", 0.0)]),
                ("w2", &[("h1", 0.1), ("h2", 0.1)]),
            ],
            &[],
        );
        let context = build_explanation(&decision, &[]);
        assert_eq!(context.critical_steps, vec!["w1"]);
        assert_eq!(context.input_order_winner.as_deref(), Some("h2"));
        assert!(context.winner_changed_by_pipeline);
    }

    #[test]
    fn deleted_hosts_attribute_their_removing_steps() {
        let decision = decided(
            "d1",
            "srv-1",
            &[("h1", 0.0), ("h2", 0.0)],
            &[("f1", &[("h1", 0.0)])],
            &[("f1", &["h2"])],
        );
        let context = build_explanation(&decision, &[]);
        assert_eq!(context.deleted_hosts["h2"], vec!["f1"]);
        assert!(!context.deleted_hosts.contains_key("h1"));
    }

    #[test]
    fn explanation_serialization_is_idempotent() {
        let decision = decided(
            "d1",
            "srv-1",
            &[("h1", 0.3), ("h2", 0.1)],
            &[
                ("w1", &[("h1", 1.0), ("h2", 2.0)]),
                ("w2", &[("h1", 0.5), ("h2", -0.5)]),
            ],
            &[],
        );
        let first = serde_json::to_string(&build_explanation(&decision, &[])).unwrap();
        let second = serde_json::to_string(&build_explanation(&decision, &[])).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn chain_lists_earlier_decisions_in_order() {
        let decision = decided("d3", "srv-1", &[("h1", 0.0)], &[], &[]);
        let first = decided("d1", "srv-1", &[("h1", 0.0)], &[], &[]);
        let second = decided("d2", "srv-1", &[("h2", 0.0)], &[], &[]);
        let context = build_explanation(&decision, &[first, second]);
        assert_eq!(context.chain.len(), 2);
        assert_eq!(context.chain[0].decision, "d1");
        assert_eq!(context.chain[1].decision, "d2");
    }
}
