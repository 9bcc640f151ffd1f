//! Service dependency graph.
//!
//! Nodes are the YAML's service names in declaration order. Edges come from
//! `deploymentDependsOn` and from env placeholders referencing a peer's
//! `publicUrl`/`internalHostname`. Env-only cycles are legal (two services
//! may point at each other's hostnames); deployment-ordering cycles are a
//! config error naming the cycle.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use domain::{DomainError, Result};

use crate::schema::ServiceSpec;

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_-]+?)_(?:publicUrl|internalHostname)\s*\}\}").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Declared `deploymentDependsOn`; constrains deployment order.
    Deployment,
    /// Placeholder reference in env values; informational only.
    Env,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Declaration order.
    nodes: Vec<String>,
    /// `(from, to, kind)`: `from` depends on `to`.
    edges: Vec<(String, String, EdgeKind)>,
}

impl DependencyGraph {
    pub fn from_services(services: &[ServiceSpec]) -> Result<Self> {
        let nodes: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let known: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();
        let mut edges = Vec::new();

        for service in services {
            for dependency in &service.deployment_depends_on {
                if !known.contains(dependency.as_str()) {
                    return Err(DomainError::Config(format!(
                        "service {} depends on unknown service {}",
                        service.name, dependency
                    )));
                }
                edges.push((service.name.clone(), dependency.clone(), EdgeKind::Deployment));
            }
            for value in service.env.values().chain(service.init_env.values()) {
                for caps in ENV_REFERENCE.captures_iter(value) {
                    let target = caps.get(1).unwrap().as_str();
                    if known.contains(target) && target != service.name {
                        let edge = (
                            service.name.clone(),
                            target.to_string(),
                            EdgeKind::Env,
                        );
                        if !edges.contains(&edge) {
                            edges.push(edge);
                        }
                    }
                }
            }
        }

        Ok(DependencyGraph { nodes, edges })
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> Vec<(String, String)> {
        self.edges
            .iter()
            .map(|(from, to, _)| (from.clone(), to.clone()))
            .collect()
    }

    /// Deployment-order predecessors of `name` (its declared dependencies).
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, _, kind)| from == name && *kind == EdgeKind::Deployment)
            .map(|(_, to, _)| to.as_str())
            .collect()
    }

    /// Kahn's algorithm over deployment edges; env edges do not constrain
    /// order. Ties break by declaration order. A cycle among deployment
    /// edges is an error naming the cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let index_of: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (from, to, kind) in &self.edges {
            if *kind != EdgeKind::Deployment {
                continue;
            }
            let from_idx = index_of[from.as_str()];
            let to_idx = index_of[to.as_str()];
            in_degree[from_idx] += 1;
            dependents[to_idx].push(from_idx);
        }

        // Ready set kept sorted by declaration index for the tie-break.
        let mut ready: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = ready.pop_front() {
            order.push(self.nodes[next].clone());
            for &dependent in &dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    let position = ready
                        .iter()
                        .position(|&queued| queued > dependent)
                        .unwrap_or(ready.len());
                    ready.insert(position, dependent);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(DomainError::DependencyCycle(self.find_cycle()));
        }
        Ok(order)
    }

    /// Walk deployment edges from an unresolved node until a repeat.
    fn find_cycle(&self) -> Vec<String> {
        let mut path: Vec<String> = Vec::new();
        let mut current = match self.edges.iter().find(|(_, _, k)| *k == EdgeKind::Deployment) {
            Some((from, _, _)) => from.clone(),
            None => return path,
        };

        loop {
            if let Some(start) = path.iter().position(|name| *name == current) {
                let mut cycle = path[start..].to_vec();
                cycle.push(current);
                return cycle;
            }
            path.push(current.clone());
            current = match self
                .edges
                .iter()
                .find(|(from, _, kind)| *from == current && *kind == EdgeKind::Deployment)
            {
                Some((_, to, _)) => to.clone(),
                None => return path,
            };
        }
    }

    /// DOT rendering for the UI; deployment edges solid, env edges dashed.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph dependencies {\n");
        for node in &self.nodes {
            out.push_str(&format!("  \"{node}\";\n"));
        }
        for (from, to, kind) in &self.edges {
            let style = match kind {
                EdgeKind::Deployment => "solid",
                EdgeKind::Env => "dashed",
            };
            out.push_str(&format!("  \"{from}\" -> \"{to}\" [style={style}];\n"));
        }
        out.push('}');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::status::DeployType;

    fn service(name: &str, depends_on: &[&str], env: &[(&str, &str)]) -> ServiceSpec {
        let mut spec = ServiceSpec::new(name, DeployType::Docker);
        spec.deployment_depends_on = depends_on.iter().map(|s| s.to_string()).collect();
        spec.env = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        spec
    }

    #[test]
    fn env_placeholder_produces_an_edge_and_order() {
        let services = vec![
            service("a", &[], &[]),
            service("b", &[], &[("X", "{{a_internalHostname}}")]),
        ];
        let graph = DependencyGraph::from_services(&services).unwrap();
        assert!(graph.edges().contains(&("b".into(), "a".into())));
        // Env edges do not constrain order; declaration order holds.
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn declared_dependencies_order_first() {
        let services = vec![
            service("api", &["db"], &[]),
            service("worker", &["api"], &[]),
            service("db", &[], &[]),
        ];
        let graph = DependencyGraph::from_services(&services).unwrap();
        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["db", "api", "worker"]
        );
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let services = vec![
            service("c", &[], &[]),
            service("a", &[], &[]),
            service("b", &[], &[]),
        ];
        let graph = DependencyGraph::from_services(&services).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["c", "a", "b"]);
    }

    #[test]
    fn env_cycles_are_permitted() {
        let services = vec![
            service("a", &[], &[("B", "{{b_publicUrl}}")]),
            service("b", &[], &[("A", "{{a_publicUrl}}")]),
        ];
        let graph = DependencyGraph::from_services(&services).unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn deployment_cycles_fail_naming_the_cycle() {
        let services = vec![
            service("a", &["b"], &[]),
            service("b", &["a"], &[]),
        ];
        let graph = DependencyGraph::from_services(&services).unwrap();
        match graph.topological_order() {
            Err(DomainError::DependencyCycle(cycle)) => {
                assert!(cycle.len() >= 3);
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn diamond_orders_both_branches_before_the_join() {
        let services = vec![
            service("gateway", &["api", "worker"], &[]),
            service("api", &["db"], &[]),
            service("worker", &["db"], &[]),
            service("db", &[], &[]),
        ];
        let graph = DependencyGraph::from_services(&services).unwrap();
        let order = graph.topological_order().unwrap();
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(position("db") < position("api"));
        assert!(position("db") < position("worker"));
        assert!(position("api") < position("gateway"));
        assert!(position("worker") < position("gateway"));
        // Independent branches keep declaration order.
        assert!(position("api") < position("worker"));
    }

    #[test]
    fn self_references_in_env_do_not_create_edges() {
        let services = vec![service("a", &[], &[("SELF", "{{a_publicUrl}}")])];
        let graph = DependencyGraph::from_services(&services).unwrap();
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn dependencies_of_lists_only_deployment_edges() {
        let services = vec![
            service("a", &[], &[]),
            service("b", &["a"], &[("X", "{{a_internalHostname}}")]),
        ];
        let graph = DependencyGraph::from_services(&services).unwrap();
        assert_eq!(graph.dependencies_of("b"), vec!["a"]);
        assert!(graph.dependencies_of("a").is_empty());
    }

    #[test]
    fn unknown_dependency_is_a_config_error() {
        let services = vec![service("a", &["ghost"], &[])];
        let err = DependencyGraph::from_services(&services).unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn dot_output_contains_nodes_and_styles() {
        let services = vec![
            service("a", &[], &[]),
            service("b", &["a"], &[("X", "{{a_internalHostname}}")]),
        ];
        let graph = DependencyGraph::from_services(&services).unwrap();
        let dot = graph.to_dot();
        assert!(dot.contains("\"b\" -> \"a\" [style=solid];"));
        assert!(dot.contains("\"b\" -> \"a\" [style=dashed];"));
    }
}
