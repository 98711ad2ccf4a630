use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Summary of the object-type dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySummary {
    pub nodes: usize,
    pub edges: usize,
}

/// Load order for object types, or the types caught in a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyReport {
    pub summary: DependencySummary,
    pub load_order: Option<Vec<String>>,
    pub cycle: Option<Vec<String>>,
}

/// Directed "must load before" graph between object types.
///
/// Nodes keep their discovery order, which breaks ties in the load order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    edges: BTreeMap<usize, BTreeSet<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type; a no-op when it is already known.
    pub fn add_node(&mut self, object_type: &str) -> usize {
        match self.nodes.iter().position(|node| node == object_type) {
            Some(idx) => idx,
            None => {
                self.nodes.push(object_type.to_string());
                self.nodes.len() - 1
            }
        }
    }

    /// Record that records of `dependent` reference records of `parent`.
    ///
    /// Self references are ignored: they cannot be ordered across groups.
    pub fn add_dependency(&mut self, parent: &str, dependent: &str) {
        let parent_idx = self.add_node(parent);
        let dependent_idx = self.add_node(dependent);
        if parent_idx != dependent_idx {
            self.edges.entry(parent_idx).or_default().insert(dependent_idx);
        }
    }

    /// Types that `object_type` is loaded before.
    pub fn dependents(&self, object_type: &str) -> Vec<&str> {
        let Some(idx) = self.nodes.iter().position(|node| node == object_type) else {
            return Vec::new();
        };
        self.edges
            .get(&idx)
            .map(|targets| targets.iter().map(|t| self.nodes[*t].as_str()).collect())
            .unwrap_or_default()
    }

    pub fn report(&self) -> DependencyReport {
        let summary = DependencySummary {
            nodes: self.nodes.len(),
            edges: self.edges.values().map(BTreeSet::len).sum(),
        };

        match self.toposort() {
            Ok(order) => DependencyReport {
                summary,
                load_order: Some(order),
                cycle: None,
            },
            Err(cycle) => DependencyReport {
                summary,
                load_order: None,
                cycle: Some(cycle),
            },
        }
    }

    fn toposort(&self) -> Result<Vec<String>, Vec<String>> {
        let mut indegree = vec![0_usize; self.nodes.len()];
        for targets in self.edges.values() {
            for target in targets {
                indegree[*target] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter_map(|(idx, count)| if *count == 0 { Some(idx) } else { None })
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            order.push(self.nodes[node].clone());

            if let Some(targets) = self.edges.get(&node) {
                for target in targets {
                    let count = &mut indegree[*target];
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(*target);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let cycle_nodes: Vec<String> = indegree
                .into_iter()
                .enumerate()
                .filter_map(|(idx, count)| if count > 0 { Some(self.nodes[idx].clone()) } else { None })
                .collect();
            Err(cycle_nodes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parents_load_before_children() {
        let mut graph = DependencyGraph::new();
        graph.add_node("Contact");
        graph.add_dependency("Account", "Contact");
        graph.add_dependency("Contact", "Case");
        graph.add_dependency("Account", "Case");

        let report = graph.report();
        assert_eq!(report.summary.nodes, 3);
        assert_eq!(report.summary.edges, 3);
        assert_eq!(
            report.load_order.expect("expected load order"),
            vec!["Account", "Contact", "Case"]
        );
    }

    #[test]
    fn independent_types_keep_discovery_order() {
        let mut graph = DependencyGraph::new();
        graph.add_node("Zeta");
        graph.add_node("Alpha");
        assert_eq!(graph.report().load_order.unwrap(), vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn self_references_are_ignored() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("Account", "Account");
        assert_eq!(graph.report().load_order.unwrap(), vec!["Account"]);
        assert!(graph.dependents("Account").is_empty());
    }

    #[test]
    fn reports_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("Account", "Contact");
        graph.add_dependency("Contact", "Account");
        graph.add_node("Case");

        let report = graph.report();
        assert!(report.load_order.is_none());
        let cycle = report.cycle.expect("cycle");
        assert!(cycle.contains(&"Account".to_string()));
        assert!(!cycle.contains(&"Case".to_string()));
    }
}
