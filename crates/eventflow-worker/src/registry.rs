//! # Processor Registry
//!
//! Explicit name -> constructor table. Workers never resolve processors
//! dynamically; every name a graph can dispatch must be registered up front,
//! and [`ProcessorRegistry::validate_against`] is run at startup so a missing
//! registration fails the process instead of a task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use eventflow_shared::errors::{EventFlowError, EventFlowResult};
use eventflow_shared::graph::FlowGraph;

use crate::processor::Processor;

type ProcessorFactory = Arc<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

/// Name -> constructor map for processor bodies
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, ProcessorFactory>,
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.names())
            .finish()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under a processor name; last registration wins
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Construct a fresh processor instance for one execution
    pub fn build(&self, name: &str) -> EventFlowResult<Box<dyn Processor>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| EventFlowError::UnregisteredProcessor(name.to_string()))?;
        Ok(factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Startup check: every processor and termination handler the graph can
    /// dispatch must have a registered constructor
    pub fn validate_against(&self, graph: &FlowGraph) -> EventFlowResult<()> {
        for name in graph.processor_names() {
            if !self.contains(name) {
                return Err(EventFlowError::UnregisteredProcessor(name.to_string()));
            }
        }
        for name in graph.termination_processors() {
            if !self.contains(name) {
                return Err(EventFlowError::UnregisteredProcessor(name.clone()));
            }
        }
        Ok(())
    }
}
