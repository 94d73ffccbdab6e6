//! Dependency graph resolution.
//!
//! Nodes declare their predecessors by name. [`DependencyGraph::resolve`]
//! groups nodes into topological layers so that each layer only depends on
//! earlier layers; [`DependencyGraph::distinct_subgraphs`] extracts the
//! subgraphs reachable (upwards) from a predicate-selected frontier, which
//! is how trigger topics are mapped to the extractors they refresh.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// A named node with declared predecessors.
pub trait GraphNode {
    fn node_name(&self) -> &str;
    fn predecessors(&self) -> Vec<String>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle among nodes: {0:?}")]
    Cycle(Vec<String>),
    #[error("node `{node}` declares unknown dependency `{dependency}`")]
    UnknownDependency { node: String, dependency: String },
    #[error("duplicate node name `{0}`")]
    DuplicateNode(String),
}

/// A directed acyclic graph of named nodes. Declaration order is preserved
/// and used to break ties within a resolved layer.
#[derive(Debug, Clone)]
pub struct DependencyGraph<T> {
    nodes: Vec<T>,
}

impl<T: GraphNode> DependencyGraph<T> {
    /// Builds a graph, failing fast on duplicate names and on dependencies
    /// that name no node.
    pub fn new(nodes: Vec<T>) -> Result<Self, GraphError> {
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.node_name().to_string()) {
                return Err(GraphError::DuplicateNode(node.node_name().to_string()));
            }
        }
        for node in &nodes {
            for dep in node.predecessors() {
                if !seen.contains(&dep) {
                    return Err(GraphError::UnknownDependency {
                        node: node.node_name().to_string(),
                        dependency: dep,
                    });
                }
            }
        }
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[T] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Groups nodes into layers by longest path from a root: every
    /// predecessor of a node in layer `i` lives in some layer `j < i`.
    /// Ties within a layer keep declaration order.
    pub fn resolve(&self) -> Result<Vec<Vec<&T>>, GraphError> {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_name(), i))
            .collect();

        let mut levels: Vec<Option<usize>> = vec![None; self.nodes.len()];
        loop {
            let mut changed = false;
            for (i, node) in self.nodes.iter().enumerate() {
                if levels[i].is_some() {
                    continue;
                }
                let mut level = 0usize;
                let mut ready = true;
                for dep in node.predecessors() {
                    match levels[index[dep.as_str()]] {
                        Some(dep_level) => level = level.max(dep_level + 1),
                        None => {
                            ready = false;
                            break;
                        }
                    }
                }
                if ready {
                    levels[i] = Some(level);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let unresolved: Vec<String> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| levels[*i].is_none())
            .map(|(_, n)| n.node_name().to_string())
            .collect();
        if !unresolved.is_empty() {
            return Err(GraphError::Cycle(unresolved));
        }

        let depth = levels.iter().map(|l| l.unwrap() + 1).max().unwrap_or(0);
        let mut layers: Vec<Vec<&T>> = vec![Vec::new(); depth];
        for (i, node) in self.nodes.iter().enumerate() {
            layers[levels[i].unwrap()].push(node);
        }
        Ok(layers)
    }

    /// Transitive predecessors of the node at `idx`, as indices.
    fn ancestors(&self, idx: usize, index: &HashMap<&str, usize>) -> HashSet<usize> {
        let mut out = HashSet::new();
        let mut stack = vec![idx];
        while let Some(cur) = stack.pop() {
            for dep in self.nodes[cur].predecessors() {
                let dep_idx = index[dep.as_str()];
                if out.insert(dep_idx) {
                    stack.push(dep_idx);
                }
            }
        }
        out
    }
}

impl<T: GraphNode + Clone> DependencyGraph<T> {
    /// Extracts one subgraph per frontier node, where the frontier is the
    /// maximal antichain of nodes satisfying `pred`: matched nodes that are
    /// an ancestor of another matched node are dropped in favour of the
    /// downstream one. Each subgraph is the frontier node plus its
    /// transitive predecessors. Subgraphs may share ancestors; the shared
    /// ancestor is carried (and later executed) once per subgraph.
    pub fn distinct_subgraphs<F>(&self, pred: F) -> Vec<DependencyGraph<T>>
    where
        F: Fn(&T) -> bool,
    {
        let index: HashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_name(), i))
            .collect();

        let matched: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| pred(&self.nodes[i]))
            .collect();
        let ancestor_sets: HashMap<usize, HashSet<usize>> = matched
            .iter()
            .map(|&i| (i, self.ancestors(i, &index)))
            .collect();

        let frontier: Vec<usize> = matched
            .iter()
            .copied()
            .filter(|&i| !matched.iter().any(|&other| ancestor_sets[&other].contains(&i)))
            .collect();

        frontier
            .into_iter()
            .map(|root| {
                let mut members = ancestor_sets[&root].clone();
                members.insert(root);
                let nodes: Vec<T> = self
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| members.contains(i))
                    .map(|(_, n)| n.clone())
                    .collect();
                // Members are closed under predecessors, so this cannot fail.
                DependencyGraph { nodes }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Node {
        name: &'static str,
        deps: Vec<&'static str>,
        triggers: Vec<&'static str>,
    }

    impl GraphNode for Node {
        fn node_name(&self) -> &str {
            self.name
        }

        fn predecessors(&self) -> Vec<String> {
            self.deps.iter().map(|d| d.to_string()).collect()
        }
    }

    fn node(name: &'static str, deps: &[&'static str]) -> Node {
        Node {
            name,
            deps: deps.to_vec(),
            triggers: vec![],
        }
    }

    fn layer_names(layers: &[Vec<&Node>]) -> Vec<Vec<&'static str>> {
        layers
            .iter()
            .map(|layer| layer.iter().map(|n| n.name).collect())
            .collect()
    }

    #[test]
    fn linear_chain_resolves_to_single_node_layers() {
        let graph = DependencyGraph::new(vec![
            node("A", &[]),
            node("B", &["A"]),
            node("C", &["B"]),
        ])
        .unwrap();
        let layers = graph.resolve().unwrap();
        assert_eq!(layer_names(&layers), vec![vec!["A"], vec!["B"], vec!["C"]]);
    }

    #[test]
    fn diamond_resolves_with_parallel_middle_layer() {
        let graph = DependencyGraph::new(vec![
            node("A", &[]),
            node("B", &["A"]),
            node("C", &["A"]),
            node("D", &["B", "C"]),
        ])
        .unwrap();
        let layers = graph.resolve().unwrap();
        assert_eq!(
            layer_names(&layers),
            vec![vec!["A"], vec!["B", "C"], vec!["D"]]
        );
    }

    #[test]
    fn cycle_is_reported() {
        let graph = DependencyGraph::new(vec![
            node("A", &["B"]),
            node("B", &["A"]),
            node("C", &[]),
        ])
        .unwrap();
        match graph.resolve() {
            Err(GraphError::Cycle(names)) => {
                assert_eq!(names, vec!["A".to_string(), "B".to_string()])
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_fails_at_construction() {
        let err = DependencyGraph::new(vec![node("A", &["missing"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency {
                node: "A".to_string(),
                dependency: "missing".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_node_fails_at_construction() {
        let err = DependencyGraph::new(vec![node("A", &[]), node("A", &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode("A".to_string()));
    }

    #[test]
    fn diamond_trigger_yields_two_subgraphs_sharing_the_ancestor() {
        let mut b = node("B", &["A"]);
        b.triggers = vec!["T"];
        let mut c = node("C", &["A"]);
        c.triggers = vec!["T"];
        let graph = DependencyGraph::new(vec![
            node("A", &[]),
            b,
            c,
            node("D", &["B", "C"]),
        ])
        .unwrap();

        let subgraphs = graph.distinct_subgraphs(|n| n.triggers.contains(&"T"));
        assert_eq!(subgraphs.len(), 2);

        let orders: Vec<Vec<Vec<&'static str>>> = subgraphs
            .iter()
            .map(|sg| layer_names(&sg.resolve().unwrap()))
            .collect();
        assert_eq!(
            orders,
            vec![vec![vec!["A"], vec!["B"]], vec![vec!["A"], vec!["C"]]]
        );
    }

    #[test]
    fn frontier_keeps_only_downstream_matches() {
        let mut b = node("B", &["A"]);
        b.triggers = vec!["T"];
        let mut d = node("D", &["B"]);
        d.triggers = vec!["T"];
        let graph = DependencyGraph::new(vec![node("A", &[]), b, d]).unwrap();

        let subgraphs = graph.distinct_subgraphs(|n| n.triggers.contains(&"T"));
        assert_eq!(subgraphs.len(), 1);
        assert_eq!(
            layer_names(&subgraphs[0].resolve().unwrap()),
            vec![vec!["A"], vec!["B"], vec!["D"]]
        );
    }

    #[test]
    fn no_matches_yields_no_subgraphs() {
        let graph = DependencyGraph::new(vec![node("A", &[])]).unwrap();
        assert!(graph.distinct_subgraphs(|_| false).is_empty());
    }
}
