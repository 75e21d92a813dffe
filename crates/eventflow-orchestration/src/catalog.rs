//! # Flow Catalog
//!
//! The flow graphs shipped with the system. Only the flow types declared
//! here are valid; starting a flow with any other type fails loudly with
//! `UnknownFlowType` rather than falling back to a default.

use eventflow_shared::errors::EventFlowResult;
use eventflow_shared::graph::{FlowGraph, GraphError, GraphRegistry};

/// The writing-evaluation flow: grammar and coherence fan out from the root
/// arguments, the final score joins them, the saver persists everything, and
/// the assessment evaluator runs last. AbortHandler compensates on abort.
pub fn writing() -> Result<FlowGraph, GraphError> {
    FlowGraph::builder("writing")
        .processor("InterviewPrepGrammar", &[])
        .processor("Coherence", &[])
        .processor("WritingFinalScore", &["InterviewPrepGrammar", "Coherence"])
        .processor(
            "WritingSaver",
            &["InterviewPrepGrammar", "Coherence", "WritingFinalScore"],
        )
        .processor("AssessmentEvaluatorProcessor", &["WritingSaver"])
        .termination("AbortHandler")
        .build()
}

/// Registry of every declared flow type
pub fn default_registry() -> EventFlowResult<GraphRegistry> {
    let mut registry = GraphRegistry::new();
    registry.insert(writing()?);
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writing_graph_shape() {
        let graph = writing().unwrap();

        let roots: Vec<&str> = graph.roots().collect();
        assert_eq!(roots, vec!["InterviewPrepGrammar", "Coherence"]);

        assert_eq!(
            graph.dependencies("WritingSaver").unwrap(),
            &[
                "InterviewPrepGrammar".to_string(),
                "Coherence".to_string(),
                "WritingFinalScore".to_string()
            ]
        );
        assert_eq!(
            graph.dependents_of("WritingSaver"),
            &["AssessmentEvaluatorProcessor".to_string()]
        );
        assert_eq!(graph.termination_processors(), &["AbortHandler".to_string()]);
    }

    #[test]
    fn test_default_registry_rejects_undeclared_types() {
        let registry = default_registry().unwrap();
        assert!(registry.get("writing").is_ok());
        assert!(registry.get("default").is_err());
        assert!(registry.get("interview_prep").is_err());
    }
}
