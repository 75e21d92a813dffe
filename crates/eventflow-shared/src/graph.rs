//! # Flow Graphs
//!
//! A [`FlowGraph`] is the validated, immutable definition of one flow type:
//! an ordered set of named processors with dependency lists, plus the
//! termination processors that run only when a flow aborts. Graphs are built
//! once at startup through [`FlowGraphBuilder`] and fail fast on cycles,
//! dangling dependencies, and processor/termination overlap.
//!
//! Declaration order is significant: when several dependents of a completed
//! processor become ready at once, they are dispatched in the order their
//! nodes were declared.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::errors::{EventFlowError, EventFlowResult};

/// Validation and lookup errors for flow graphs
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("flow type '{flow_type}' declares processor '{name}' more than once")]
    DuplicateProcessor { flow_type: String, name: String },

    #[error(
        "flow type '{flow_type}': processor '{name}' depends on undeclared processor '{dependency}'"
    )]
    DanglingDependency {
        flow_type: String,
        name: String,
        dependency: String,
    },

    #[error("flow type '{flow_type}' has a dependency cycle involving {names:?}")]
    CycleDetected { flow_type: String, names: Vec<String> },

    #[error("flow type '{flow_type}': termination processor '{name}' also appears in the processor set")]
    TerminationOverlap { flow_type: String, name: String },

    #[error("processor '{0}' is not present in the graph")]
    UnknownProcessor(String),
}

/// One node of a flow graph
#[derive(Debug, Clone)]
pub struct ProcessorNode {
    pub name: String,
    pub depends_on: Vec<String>,
}

/// Validated, immutable flow-graph definition for one flow type
#[derive(Debug, Clone)]
pub struct FlowGraph {
    flow_type: String,
    processors: Vec<ProcessorNode>,
    termination: Vec<String>,
    /// provider name -> dependents, in dependent declaration order
    dependents: HashMap<String, Vec<String>>,
}

impl FlowGraph {
    pub fn builder(flow_type: impl Into<String>) -> FlowGraphBuilder {
        FlowGraphBuilder {
            flow_type: flow_type.into(),
            processors: Vec::new(),
            termination: Vec::new(),
        }
    }

    pub fn flow_type(&self) -> &str {
        &self.flow_type
    }

    /// All processor names in declaration order (termination set excluded)
    pub fn processor_names(&self) -> impl Iterator<Item = &str> {
        self.processors.iter().map(|node| node.name.as_str())
    }

    /// Processors with an empty dependency list, in declaration order
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.processors
            .iter()
            .filter(|node| node.depends_on.is_empty())
            .map(|node| node.name.as_str())
    }

    pub fn termination_processors(&self) -> &[String] {
        &self.termination
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors.iter().any(|node| node.name == name)
    }

    pub fn is_termination(&self, name: &str) -> bool {
        self.termination.iter().any(|t| t == name)
    }

    /// True when `name` is either a processor or a termination processor
    pub fn has_node(&self, name: &str) -> bool {
        self.contains(name) || self.is_termination(name)
    }

    /// Declared dependencies of a node. Termination processors have none.
    pub fn dependencies(&self, name: &str) -> Result<&[String], GraphError> {
        if let Some(node) = self.processors.iter().find(|node| node.name == name) {
            return Ok(&node.depends_on);
        }
        if self.is_termination(name) {
            return Ok(&[]);
        }
        Err(GraphError::UnknownProcessor(name.to_string()))
    }

    /// Dependents of a provider, in dependent declaration order
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Builder for [`FlowGraph`]; validation happens in [`FlowGraphBuilder::build`]
#[derive(Debug)]
pub struct FlowGraphBuilder {
    flow_type: String,
    processors: Vec<ProcessorNode>,
    termination: Vec<String>,
}

impl FlowGraphBuilder {
    pub fn processor(mut self, name: impl Into<String>, depends_on: &[&str]) -> Self {
        self.processors.push(ProcessorNode {
            name: name.into(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        });
        self
    }

    pub fn termination(mut self, name: impl Into<String>) -> Self {
        self.termination.push(name.into());
        self
    }

    pub fn build(self) -> Result<FlowGraph, GraphError> {
        let flow_type = self.flow_type;

        // Duplicate processor names
        let mut seen: HashMap<&str, ()> = HashMap::with_capacity(self.processors.len());
        for node in &self.processors {
            if seen.insert(node.name.as_str(), ()).is_some() {
                return Err(GraphError::DuplicateProcessor {
                    flow_type,
                    name: node.name.clone(),
                });
            }
        }

        // Dangling dependencies
        for node in &self.processors {
            for dependency in &node.depends_on {
                if !seen.contains_key(dependency.as_str()) {
                    return Err(GraphError::DanglingDependency {
                        flow_type,
                        name: node.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        // Termination processors must be disjoint from the processor set and unique
        let mut term_seen: HashMap<&str, ()> = HashMap::new();
        for name in &self.termination {
            if seen.contains_key(name.as_str()) || term_seen.insert(name.as_str(), ()).is_some() {
                return Err(GraphError::TerminationOverlap {
                    flow_type,
                    name: name.clone(),
                });
            }
        }

        // Cycle detection (Kahn). Anything left with a nonzero in-degree after
        // the topological pass sits on a cycle.
        let mut in_degree: HashMap<&str, usize> = self
            .processors
            .iter()
            .map(|node| (node.name.as_str(), node.depends_on.len()))
            .collect();
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut forward: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.processors {
            for dependency in &node.depends_on {
                forward
                    .entry(dependency.as_str())
                    .or_default()
                    .push(node.name.as_str());
            }
        }

        let mut visited = 0usize;
        while let Some(name) = queue.pop_front() {
            visited += 1;
            for &dependent in forward.get(name).into_iter().flatten() {
                let degree = in_degree
                    .get_mut(dependent)
                    .expect("dependent is a declared processor");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if visited != self.processors.len() {
            let mut names: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(name, _)| name.to_string())
                .collect();
            names.sort();
            return Err(GraphError::CycleDetected { flow_type, names });
        }

        // provider -> dependents, dependent declaration order
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for node in &self.processors {
            for dependency in &node.depends_on {
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .push(node.name.clone());
            }
        }

        Ok(FlowGraph {
            flow_type,
            processors: self.processors,
            termination: self.termination,
            dependents,
        })
    }
}

/// Flow-type -> graph lookup table, assembled once at startup
///
/// Unknown flow types fail loudly; there is no fallback type.
#[derive(Debug, Clone, Default)]
pub struct GraphRegistry {
    graphs: HashMap<String, Arc<FlowGraph>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, graph: FlowGraph) {
        self.graphs
            .insert(graph.flow_type().to_string(), Arc::new(graph));
    }

    pub fn get(&self, flow_type: &str) -> EventFlowResult<Arc<FlowGraph>> {
        self.graphs
            .get(flow_type)
            .cloned()
            .ok_or_else(|| EventFlowError::UnknownFlowType(flow_type.to_string()))
    }

    pub fn flow_types(&self) -> Vec<&str> {
        self.graphs.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> FlowGraph {
        FlowGraph::builder("diamond")
            .processor("A", &[])
            .processor("B", &["A"])
            .processor("C", &["A"])
            .processor("D", &["B", "C"])
            .termination("Cleanup")
            .build()
            .unwrap()
    }

    #[test]
    fn test_roots_are_empty_dependency_processors() {
        let graph = diamond();
        let roots: Vec<&str> = graph.roots().collect();
        assert_eq!(roots, vec!["A"]);
    }

    #[test]
    fn test_dependents_preserve_declaration_order() {
        let graph = diamond();
        assert_eq!(graph.dependents_of("A"), &["B".to_string(), "C".to_string()]);
        assert_eq!(graph.dependents_of("B"), &["D".to_string()]);
        assert!(graph.dependents_of("D").is_empty());
    }

    #[test]
    fn test_dependencies_lookup() {
        let graph = diamond();
        assert_eq!(
            graph.dependencies("D").unwrap(),
            &["B".to_string(), "C".to_string()]
        );
        assert!(graph.dependencies("A").unwrap().is_empty());
        // Termination processors have no dependencies
        assert!(graph.dependencies("Cleanup").unwrap().is_empty());
        assert!(matches!(
            graph.dependencies("Nope"),
            Err(GraphError::UnknownProcessor(_))
        ));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = FlowGraph::builder("cyclic")
            .processor("A", &["C"])
            .processor("B", &["A"])
            .processor("C", &["B"])
            .build()
            .unwrap_err();
        match err {
            GraphError::CycleDetected { names, .. } => {
                assert_eq!(names, vec!["A", "B", "C"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle_is_rejected() {
        let err = FlowGraph::builder("selfloop")
            .processor("A", &["A"])
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_dangling_dependency_is_rejected() {
        let err = FlowGraph::builder("dangling")
            .processor("A", &["Ghost"])
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::DanglingDependency { .. }));
    }

    #[test]
    fn test_duplicate_processor_is_rejected() {
        let err = FlowGraph::builder("dupe")
            .processor("A", &[])
            .processor("A", &[])
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateProcessor { .. }));
    }

    #[test]
    fn test_termination_overlap_is_rejected() {
        let err = FlowGraph::builder("overlap")
            .processor("A", &[])
            .termination("A")
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::TerminationOverlap { .. }));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = GraphRegistry::new();
        registry.insert(diamond());

        assert_eq!(registry.get("diamond").unwrap().flow_type(), "diamond");
        assert!(matches!(
            registry.get("unknown"),
            Err(EventFlowError::UnknownFlowType(_))
        ));
    }

    #[test]
    fn test_has_node_covers_termination() {
        let graph = diamond();
        assert!(graph.has_node("A"));
        assert!(graph.has_node("Cleanup"));
        assert!(!graph.contains("Cleanup"));
        assert!(graph.is_termination("Cleanup"));
        assert!(!graph.has_node("Ghost"));
    }
}
